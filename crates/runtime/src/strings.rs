//! String helpers: link collapsing, slicing and number formatting.
//!
//! `AddString` never concatenates eagerly; it builds a chain of
//! [`StringLinkRef`] nodes. Any operation that needs the actual bytes calls
//! [`get_string_ref`] which transparently collapses a chain into one flat
//! string and caches it on the link for later observers.

use crate::alloc::RefAllocator;
use crate::refs::{RefHeader, RefKind, StringLinkRef, StringRef, downcast};
use crate::value::Value;

/// Resolve a string value to a flat string, collapsing a link chain when
/// needed. `None` means an allocation failed mid-collapse.
pub unsafe fn get_string_ref(alloc: &RefAllocator, val: Value) -> Option<*mut StringRef> {
    let header = val.ref_ptr();
    unsafe {
        match (*header).kind() {
            RefKind::String => Some(downcast(header)),
            RefKind::StringLink => collapse_string_link(alloc, downcast(header)),
            _ => {
                debug_assert!(false, "value is not a string");
                None
            }
        }
    }
}

/// Total byte size of a chain, using collapsed prefixes when available.
fn string_link_size(link: &StringLinkRef) -> u32 {
    if link.is_collapsed() {
        return unsafe { (*link.collapsed()).size() };
    }

    let mut result = link.val_size();
    let mut cur = link.prev();
    loop {
        unsafe {
            if (*cur).kind() == RefKind::String {
                result += (*downcast::<StringRef>(cur)).size();
                break;
            }
            let cur_link = &*downcast::<StringLinkRef>(cur);
            if cur_link.is_collapsed() {
                result += (*cur_link.collapsed()).size();
                break;
            }
            result += cur_link.val_size();
            cur = cur_link.prev();
            debug_assert!(!cur.is_null());
        }
    }
    result
}

/// Collapse a chain into one flat string, newest piece last. The result is
/// cached on the link; the stale chain pointers are cleared by the collector
/// one pause later, when no other thread can still be walking them.
pub fn collapse_string_link(
    alloc: &RefAllocator,
    link: *mut StringLinkRef,
) -> Option<*mut StringRef> {
    let link = unsafe { &*link };
    if link.is_collapsed() {
        return Some(link.collapsed());
    }

    let size = string_link_size(link);
    let flat = alloc.alloc_str(size)?;
    let start = unsafe { (*flat).data_ptr() as *mut u8 };
    let mut end = unsafe { start.add(size as usize) };

    // Copy one flat piece in front of `end`, returning the new front.
    unsafe fn copy_piece(piece: *mut StringRef, end: *mut u8) -> *mut u8 {
        unsafe {
            let piece = &*piece;
            let end = end.sub(piece.size() as usize);
            std::ptr::copy_nonoverlapping(piece.data_ptr(), end, piece.size() as usize);
            end
        }
    }

    // The chain orders pieces back-to-front, so fill from the end.
    unsafe {
        let val = link.val();
        if val.is_ref() {
            end = copy_piece(downcast(val.ref_ptr()), end);
        } else {
            end = end.sub(1);
            *end = val.as_int() as u8;
        }

        let mut cur = link.prev();
        loop {
            if (*cur).kind() == RefKind::String {
                end = copy_piece(downcast(cur), end);
                break;
            }
            let cur_link = &*downcast::<StringLinkRef>(cur);
            if cur_link.is_collapsed() {
                end = copy_piece(cur_link.collapsed(), end);
                break;
            }
            let val = cur_link.val();
            if val.is_ref() {
                end = copy_piece(downcast(val.ref_ptr()), end);
            } else {
                end = end.sub(1);
                *end = val.as_int() as u8;
            }
            cur = cur_link.prev();
            debug_assert!(!cur.is_null());
        }
        debug_assert_eq!(end, start);
    }

    link.set_collapsed(flat);
    Some(flat)
}

pub fn chars_to_string(alloc: &RefAllocator, a: u8, b: u8) -> Option<*mut StringRef> {
    alloc.alloc_str_from(&[a, b])
}

pub fn char_to_string(alloc: &RefAllocator, val: u8) -> Option<*mut StringRef> {
    alloc.alloc_str_from(&[val])
}

pub fn int_to_string(alloc: &RefAllocator, val: i32) -> Option<*mut StringRef> {
    let mut buf = itoa_buf();
    alloc.alloc_str_from(fmt_decimal(&mut buf, val as i64))
}

pub fn long_to_string(alloc: &RefAllocator, val: i64) -> Option<*mut StringRef> {
    let mut buf = itoa_buf();
    alloc.alloc_str_from(fmt_decimal(&mut buf, val))
}

pub fn float_to_string(alloc: &RefAllocator, val: f32) -> Option<*mut StringRef> {
    alloc.alloc_str_from(format_float(val).as_bytes())
}

fn itoa_buf() -> [u8; 20] {
    [0; 20]
}

fn fmt_decimal(buf: &mut [u8; 20], val: i64) -> &[u8] {
    use std::io::Write;
    let mut cursor = std::io::Cursor::new(&mut buf[..]);
    write!(cursor, "{val}").expect("20 bytes always fit an i64");
    let len = cursor.position() as usize;
    &buf[..len]
}

/// Decimal with six significant digits, trailing zeros trimmed; scientific
/// notation outside [1e-4, 1e6). Matches the usual printf `%.6g` output for
/// the values the conversion opcodes see.
pub fn format_float(val: f32) -> String {
    if val.is_nan() {
        return "nan".to_string();
    }
    if val.is_infinite() {
        return if val < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    if val == 0.0 {
        return "0".to_string();
    }

    let exp = val.abs().log10().floor() as i32;
    if exp < -4 || exp >= 6 {
        let mut s = format!("{:.5e}", val);
        // Trim trailing zeros in the mantissa: "4.20000e7" -> "4.2e7".
        if let Some(e_pos) = s.find('e') {
            let (mantissa, exponent) = s.split_at(e_pos);
            let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
            s = format!("{mantissa}{exponent}");
        }
        s
    } else {
        let decimals = (5 - exp).max(0) as usize;
        let s = format!("{:.*}", decimals, val);
        if s.contains('.') {
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            s
        }
    }
}

pub unsafe fn check_string_eq(a: *mut StringRef, b: *mut StringRef) -> bool {
    unsafe { (*a).as_bytes() == (*b).as_bytes() }
}

/// Byte at `index`, or 0 when out of range.
pub unsafe fn index_string(target: *mut StringRef, index: i32) -> u8 {
    unsafe {
        if index < 0 || index as u32 >= (*target).size() {
            return 0;
        }
        *(*target).data_ptr().add(index as usize)
    }
}

/// Substring `[start, end)` with clamping; a full-range slice returns the
/// target itself instead of copying.
pub unsafe fn slice_string(
    alloc: &RefAllocator,
    target: *mut StringRef,
    start: i32,
    end: i32,
) -> Option<*mut StringRef> {
    let size = unsafe { (*target).size() };
    let mut start = start.max(0);
    let mut end = end.max(0);

    if end as u32 >= size {
        end = size as i32;
        if start == 0 {
            return Some(target);
        }
    }
    if start > end {
        start = end;
    }
    if start == end {
        return alloc.alloc_str(0);
    }

    let slice_len = (end - start) as usize;
    let result = alloc.alloc_str(slice_len as u32)?;
    unsafe {
        std::ptr::copy_nonoverlapping(
            (*target).data_ptr().add(start as usize),
            (*result).data_ptr() as *mut u8,
            slice_len,
        );
    }
    Some(result)
}

/// Convenience for pushing chains: accepts a string or a link.
pub unsafe fn get_string_or_link_ref(val: Value) -> *mut RefHeader {
    let header = val.ref_ptr();
    debug_assert!(matches!(
        unsafe { (*header).kind() },
        RefKind::String | RefKind::StringLink
    ));
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_orders_pieces_front_to_back() {
        let alloc = RefAllocator::new();
        let a = alloc.alloc_str_from(b"foo").unwrap();
        let b = alloc.alloc_str_from(b"bar").unwrap();
        let c = alloc.alloc_str_from(b"baz").unwrap();

        let link1 = alloc
            .alloc_str_link(a as *mut RefHeader, Value::ref_to(b as *mut RefHeader))
            .unwrap();
        let link2 = alloc
            .alloc_str_link(link1 as *mut RefHeader, Value::ref_to(c as *mut RefHeader))
            .unwrap();

        let flat = collapse_string_link(&alloc, link2).unwrap();
        unsafe { assert_eq!((*flat).as_bytes(), b"foobarbaz") };

        // Second observation reuses the cached flat string.
        assert_eq!(collapse_string_link(&alloc, link2).unwrap(), flat);
    }

    #[test]
    fn collapse_handles_char_links() {
        let alloc = RefAllocator::new();
        let a = alloc.alloc_str_from(b"hi").unwrap();
        let link = alloc
            .alloc_str_link(a as *mut RefHeader, Value::int(b'!' as i32))
            .unwrap();
        let flat = collapse_string_link(&alloc, link).unwrap();
        unsafe { assert_eq!((*flat).as_bytes(), b"hi!") };
    }

    #[test]
    fn collapse_reuses_collapsed_prefix() {
        let alloc = RefAllocator::new();
        let a = alloc.alloc_str_from(b"x").unwrap();
        let link1 = alloc
            .alloc_str_link(a as *mut RefHeader, Value::int(b'y' as i32))
            .unwrap();
        let _prefix = collapse_string_link(&alloc, link1).unwrap();

        let link2 = alloc
            .alloc_str_link(link1 as *mut RefHeader, Value::int(b'z' as i32))
            .unwrap();
        let flat = collapse_string_link(&alloc, link2).unwrap();
        unsafe { assert_eq!((*flat).as_bytes(), b"xyz") };
    }

    #[test]
    fn slice_clamps_and_shares() {
        let alloc = RefAllocator::new();
        let s = alloc.alloc_str_from(b"hello world").unwrap();
        unsafe {
            let hello = slice_string(&alloc, s, 0, 5).unwrap();
            assert_eq!((*hello).as_bytes(), b"hello");

            // Full range hands back the same reference.
            assert_eq!(slice_string(&alloc, s, 0, 999).unwrap(), s);

            // Inverted and negative indices clamp to empty.
            let empty = slice_string(&alloc, s, 7, 3).unwrap();
            assert_eq!((*empty).size(), 0);
            let neg = slice_string(&alloc, s, -3, -1).unwrap();
            assert_eq!((*neg).size(), 0);
        }
    }

    #[test]
    fn index_is_zero_out_of_range() {
        let alloc = RefAllocator::new();
        let s = alloc.alloc_str_from(b"abc").unwrap();
        unsafe {
            assert_eq!(index_string(s, 0), b'a');
            assert_eq!(index_string(s, 2), b'c');
            assert_eq!(index_string(s, 3), 0);
            assert_eq!(index_string(s, -1), 0);
        }
    }

    #[test]
    fn float_formatting_uses_six_significant_digits() {
        assert_eq!(format_float(0.0), "0");
        assert_eq!(format_float(42.0), "42");
        assert_eq!(format_float(0.5), "0.5");
        assert_eq!(format_float(-1.25), "-1.25");
        assert_eq!(format_float(1337.0), "1337");
        assert_eq!(format_float(f32::INFINITY), "inf");
        assert_eq!(format_float(f32::NEG_INFINITY), "-inf");
        assert_eq!(format_float(f32::NAN), "nan");
        // 42.1 is not exactly representable; six significant digits round
        // it back to the short form.
        assert_eq!(format_float(42.1), "42.1");
    }

    #[test]
    fn decimal_formatting_covers_extremes() {
        let alloc = RefAllocator::new();
        unsafe {
            let s = long_to_string(&alloc, i64::MIN).unwrap();
            assert_eq!((*s).as_bytes(), b"-9223372036854775808");
            let s = int_to_string(&alloc, -1).unwrap();
            assert_eq!((*s).as_bytes(), b"-1");
        }
    }
}
