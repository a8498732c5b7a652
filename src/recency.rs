//! Most-recently-used list operations shared by view and search histories.
//!
//! Inserting an element that is already present moves it to the front
//! instead of creating a duplicate, so the lists never contain repeats.

/// Remove every element equal to `item`, then prepend `item`.
pub fn push_most_recent<T: PartialEq>(list: &mut Vec<T>, item: T) {
    list.retain(|existing| *existing != item);
    list.insert(0, item);
}

/// Like [`push_most_recent`], but evicts from the back once the list
/// exceeds `cap`.
pub fn push_most_recent_capped<T: PartialEq>(list: &mut Vec<T>, item: T, cap: usize) {
    push_most_recent(list, item);
    list.truncate(cap);
}
