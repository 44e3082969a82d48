use parking_lot::Mutex;

use smb_client_core::error::SMBError;
use smb_client_core::SMBResult;

/// Credit balance the window is replenished toward on every request.
pub const PREFERRED_MINIMUM_CREDITS: u32 = 512;

/// The connection's command sequence window ([MS-SMB2] 3.2.4.1.6): a
/// monotonically increasing message-id allocator coupled to the credit
/// balance. Internally locked so the receive task can return credits without
/// the send mutex.
#[derive(Debug)]
pub struct SequenceWindow {
    inner: Mutex<SequenceWindowState>,
}

#[derive(Debug)]
struct SequenceWindowState {
    next_id: u64,
    available: u32,
}

impl SequenceWindow {
    /// A fresh window holds one credit so the NEGOTIATE request can go out.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SequenceWindowState {
                next_id: 0,
                available: 1,
            }),
        }
    }

    pub fn available(&self) -> u32 {
        self.inner.lock().available
    }

    /// Takes `count` contiguous message ids out of the window, consuming the
    /// same number of credits. Issued ids are never reused.
    pub fn get(&self, count: u32) -> SMBResult<Vec<u64>> {
        if count == 0 {
            return Err(SMBError::precondition_failed(
                "cannot draw zero message ids from the sequence window",
            ));
        }
        let mut state = self.inner.lock();
        let ids = (state.next_id..state.next_id + count as u64).collect();
        state.next_id += count as u64;
        state.available = state.available.saturating_sub(count);
        Ok(ids)
    }

    /// Applies a CreditResponse. Zero leaves the window untouched.
    pub fn credits_granted(&self, credits: u32) {
        self.inner.lock().available += credits;
    }
}

impl Default for SequenceWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_contiguous_and_never_reused() {
        let window = SequenceWindow::new();
        window.credits_granted(9);

        let first = window.get(3).unwrap();
        assert_eq!(first, vec![0, 1, 2]);
        let second = window.get(1).unwrap();
        assert_eq!(second, vec![3]);
        let third = window.get(5).unwrap();
        assert_eq!(third, vec![4, 5, 6, 7, 8]);
    }

    #[test]
    fn get_consumes_credits() {
        let window = SequenceWindow::new();
        window.credits_granted(9);
        assert_eq!(window.available(), 10);

        window.get(3).unwrap();
        assert_eq!(window.available(), 7);
    }

    #[test]
    fn zero_draw_is_rejected() {
        let window = SequenceWindow::new();
        assert!(window.get(0).is_err());
    }

    #[test]
    fn credits_never_go_negative() {
        let window = SequenceWindow::new();
        assert_eq!(window.available(), 1);
        window.get(1).unwrap();
        assert_eq!(window.available(), 0);

        // Sending without credits is allowed by policy; the window saturates.
        window.get(1).unwrap();
        assert_eq!(window.available(), 0);
        window.credits_granted(2);
        assert_eq!(window.available(), 2);
    }

    #[test]
    fn granted_credits_accumulate() {
        let window = SequenceWindow::new();
        window.credits_granted(0);
        assert_eq!(window.available(), 1);
        window.credits_granted(5);
        window.credits_granted(7);
        assert_eq!(window.available(), 13);
    }
}
