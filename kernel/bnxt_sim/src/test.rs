use crate::engine::unwrap_index;

#[test]
fn unwrap_without_epoch() {
    assert_eq!(unwrap_index(0, 5, 16, None), Some(5));
    assert_eq!(unwrap_index(14, 3, 16, None), Some(19));
}

#[test]
fn unwrap_with_epoch() {
    assert_eq!(unwrap_index(14, 3, 16, Some(true)), Some(19));
    assert_eq!(unwrap_index(19, 3, 16, Some(true)), Some(19));
    // Slot 2 of the next pass is 15 ahead of raw index 19.
    assert_eq!(unwrap_index(19, 2, 16, Some(false)), Some(34));
}

#[test]
fn stale_epoch_index_is_rejected() {
    // Raw index 17 is behind 19 in the same pass.
    assert_eq!(unwrap_index(19, 1, 16, Some(true)), None);
    // Slot 10 of the previous pass.
    assert_eq!(unwrap_index(19, 10, 16, Some(false)), None);
    // Slot 2 with the epoch of raw index 19 is a whole ring behind.
    assert_eq!(unwrap_index(34, 2, 16, Some(true)), None);
}
