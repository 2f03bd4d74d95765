//! The process-wide "currently open request" slot.
//!
//! Only one request may hold a live modal host at a time. Opening a
//! request displaces the previous holder and cancels it.

use std::cell::RefCell;

struct Holder {
    id: u64,
    cancel: Box<dyn FnOnce()>,
}

thread_local! {
    static CURRENT: RefCell<Option<Holder>> = const { RefCell::new(None) };
}

/// Install `id` as current. The displaced holder's `cancel` runs after
/// the slot is updated, so it may re-enter this module.
pub(crate) fn displace(id: u64, cancel: impl FnOnce() + 'static) {
    let previous = CURRENT.with(|slot| {
        slot.borrow_mut().replace(Holder {
            id,
            cancel: Box::new(cancel),
        })
    });
    if let Some(previous) = previous {
        if previous.id != id {
            tracing::debug!(displaced = previous.id, current = id, "request displaced");
            (previous.cancel)();
        }
    }
}

/// Clear the slot if `id` still holds it.
pub(crate) fn release(id: u64) {
    CURRENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.as_ref().is_some_and(|h| h.id == id) {
            slot.take();
        }
    });
}

/// Id of the current holder.
#[must_use]
pub fn current_id() -> Option<u64> {
    CURRENT.with(|slot| slot.borrow().as_ref().map(|h| h.id))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn displacing_cancels_previous_holder() {
        let cancelled = Rc::new(Cell::new(false));
        let flag = Rc::clone(&cancelled);
        displace(1_000, move || flag.set(true));
        assert_eq!(current_id(), Some(1_000));
        displace(1_001, || {});
        assert!(cancelled.get());
        assert_eq!(current_id(), Some(1_001));
        release(1_001);
        assert_eq!(current_id(), None);
    }

    #[test]
    fn stale_release_keeps_newer_holder() {
        displace(2_000, || {});
        displace(2_001, || {});
        release(2_000);
        assert_eq!(current_id(), Some(2_001));
        release(2_001);
    }

    #[test]
    fn cancel_may_release_itself() {
        displace(3_000, || release(3_000));
        displace(3_001, || {});
        assert_eq!(current_id(), Some(3_001));
        release(3_001);
    }
}
