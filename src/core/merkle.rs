// Merkle commitment over serialized transactions

use crate::core::{Hash256, sha256, sha256_pair};

/// Fold a list of serialized transactions into one root digest.
///
/// Leaves are `SHA256(data)`, interior nodes `SHA256(left || right)`.
/// Any level with an odd number of nodes has its last node duplicated,
/// so a single transaction yields `SHA256(leaf || leaf)`.
pub fn merkle_root<T: AsRef<[u8]>>(items: &[T]) -> Hash256 {
    if items.is_empty() {
        return Hash256::zero();
    }

    let mut level: Vec<Hash256> = items.iter().map(|item| sha256(item.as_ref())).collect();

    loop {
        if level.len() % 2 != 0 {
            let last = level[level.len() - 1];
            level.push(last);
        }

        level = level
            .chunks(2)
            .map(|pair| sha256_pair(&pair[0], &pair[1]))
            .collect();

        if level.len() == 1 {
            return level[0];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_item_is_hashed_with_itself() {
        let leaf = sha256(b"tx");
        assert_eq!(merkle_root(&[b"tx"]), sha256_pair(&leaf, &leaf));
    }

    #[test]
    fn test_two_items() {
        let a = sha256(b"a");
        let b = sha256(b"b");
        assert_eq!(merkle_root(&[b"a", b"b"]), sha256_pair(&a, &b));
    }

    #[test]
    fn test_odd_count_duplicates_last() {
        // Three leaves pad to four: [a, b, c, c]
        let a = sha256(b"a");
        let b = sha256(b"b");
        let c = sha256(b"c");
        let expected = sha256_pair(&sha256_pair(&a, &b), &sha256_pair(&c, &c));

        assert_eq!(merkle_root(&[b"a", b"b", b"c"]), expected);
        assert_eq!(merkle_root(&[b"a", b"b", b"c"]), merkle_root(&[b"a", b"b", b"c", b"c"]));
    }

    #[test]
    fn test_five_items_pad_every_level() {
        let items: Vec<&[u8]> = vec![b"1", b"2", b"3", b"4", b"5"];
        let leaves: Vec<Hash256> = items.iter().map(|i| sha256(i)).collect();

        // [1 2 3 4 5 5] -> [12 34 55] -> [12 34 55 55] -> [1234 5555] -> root
        let l1 = [
            sha256_pair(&leaves[0], &leaves[1]),
            sha256_pair(&leaves[2], &leaves[3]),
            sha256_pair(&leaves[4], &leaves[4]),
        ];
        let l2 = [sha256_pair(&l1[0], &l1[1]), sha256_pair(&l1[2], &l1[2])];
        let expected = sha256_pair(&l2[0], &l2[1]);

        assert_eq!(merkle_root(&items), expected);
    }

    #[test]
    fn test_deterministic_and_order_sensitive() {
        let forward = merkle_root(&[b"a", b"b", b"c", b"d"]);
        assert_eq!(forward, merkle_root(&[b"a", b"b", b"c", b"d"]));
        assert_ne!(forward, merkle_root(&[b"b", b"a", b"c", b"d"]));
    }
}
