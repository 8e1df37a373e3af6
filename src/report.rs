//! HID report helpers shared by the transports.

use bytes::{Bytes, BytesMut};

/// Report ID value that transports prepend when a device does not use
/// numbered reports.
pub const NULL_REPORT_ID: u8 = 0x00;

/// Drops a leading null report ID.
///
/// Reports with a non-zero first byte are returned unchanged.
#[inline]
pub fn strip_report_id(report: &[u8]) -> &[u8] {
    match report.first() {
        Some(&NULL_REPORT_ID) => &report[1..],
        _ => report,
    }
}

/// Copies `buf` into a new buffer of at least `size` bytes, zero-filling the tail.
pub(crate) fn pad_report(buf: &[u8], size: usize) -> Bytes {
    let mut report = BytesMut::zeroed(buf.len().max(size));
    report[..buf.len()].copy_from_slice(buf);
    report.freeze()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn strips_null_report_id() {
        assert_eq!(&[0x01u8, 0x02, 0x03], strip_report_id(&[0x00, 0x01, 0x02, 0x03]));
    }

    #[test]
    fn keeps_numbered_report() {
        assert_eq!(&[0x05u8, 0x01, 0x02], strip_report_id(&[0x05, 0x01, 0x02]));
        assert!(strip_report_id(&[]).is_empty());
    }

    #[test]
    fn pads_short_write() {
        let report = pad_report(&[1, 2, 3], 8);
        assert_eq!(&[1u8, 2, 3, 0, 0, 0, 0, 0], &report[..]);
    }

    #[test]
    fn never_truncates() {
        let report = pad_report(&[1, 2, 3, 4], 2);
        assert_eq!(&[1u8, 2, 3, 4], &report[..]);
    }
}
