//! Name keys.
//!
//! A name is stored once per database and referenced by its [`NameKey`]: the 32-bit xxHash of
//! the name, moved to the next free key if that one is bound to another name.

use revtree_core::NameKey;

pub fn name_hash(name: &str) -> NameKey {
    twox_hash::XxHash32::oneshot(0, name.as_bytes())
}

/// Find the key `name` is bound to, or the key it would be bound to.
///
/// Returns the key and whether `name` is already bound to it.
pub fn probe<S: AsRef<str>>(lookup: impl Fn(NameKey) -> Option<S>, name: &str) -> (NameKey, bool) {
    let mut key = name_hash(name);
    loop {
        match lookup(key) {
            Some(bound) if bound.as_ref() == name => return (key, true),
            Some(_) => key = key.wrapping_add(1),
            None => return (key, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn collisions_move_to_next_free_key() {
        let mut names: BTreeMap<NameKey, String> = BTreeMap::new();
        let taken = name_hash("a");
        names.insert(taken, "someone-else".to_string());
        names.insert(taken.wrapping_add(1), "another".to_string());

        let (key, bound) = probe(|k| names.get(&k).map(String::as_str), "a");
        assert!(!bound);
        assert_eq!(key, taken.wrapping_add(2));

        names.insert(key, "a".to_string());
        assert_eq!(probe(|k| names.get(&k).map(String::as_str), "a"), (key, true));
    }
}
