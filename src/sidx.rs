//! Stripping of MPEG-DASH `sidx` boxes from fragment heads.
//!
//! Each fragment may start with a segment index box that must not appear
//! mid-stream in the concatenated output. The coordinator passes the first
//! chunk of every fragment through [`remove_sidx`]; the rest of the payload
//! is written verbatim.

use std::borrow::Cow;

/// Remove a `sidx` box from `data`, returning the buffer unchanged when no
/// well-formed box is found.
///
/// The box size is the big-endian u32 immediately preceding the `sidx`
/// fourcc. A box that claims to extend past the buffer is left alone rather
/// than truncating payload bytes.
pub fn remove_sidx(data: &[u8]) -> Cow<'_, [u8]> {
    let Some(fourcc) = find(data, b"sidx") else {
        return Cow::Borrowed(data);
    };

    if fourcc < 4 {
        return Cow::Borrowed(data);
    }

    let start = fourcc - 4;
    let size_bytes: [u8; 4] = data[start..fourcc].try_into().unwrap();
    let box_size = u32::from_be_bytes(size_bytes) as usize;

    if box_size < 8 || start + box_size > data.len() {
        return Cow::Borrowed(data);
    }

    let mut stripped = Vec::with_capacity(data.len() - box_size);
    stripped.extend_from_slice(&data[..start]);
    stripped.extend_from_slice(&data[start + box_size..]);
    Cow::Owned(stripped)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
