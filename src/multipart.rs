//! `multipart/byteranges` framing.
//!
//! A body is every part's header block immediately followed by its bytes, then
//! the closing boundary:
//!
//! ```text
//! --{boundary}\r\n
//! Content-Type: {type}\r\n
//! Content-Range: bytes {start}-{end}/{size}\r\n
//! \r\n
//! {bytes}\r\n--{boundary}\r\n
//! ...
//! {bytes}\r\n--{boundary}--
//! ```

use uuid::Uuid;

use crate::ByteRange;

/// Per-part header blocks and their combined byte length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartHeaders {
    pub headers: Vec<String>,
    pub size: u64,
}

/// Build the header block for every part, in set order.
pub fn build_headers(
    ranges: &[ByteRange],
    boundary: &str,
    content_type: &str,
    file_size: u64,
) -> MultipartHeaders {
    let headers: Vec<String> = ranges
        .iter()
        .enumerate()
        .map(|(i, range)| {
            let lead = if i == 0 { "" } else { "\r\n" };
            format!(
                "{lead}--{boundary}\r\n\
                 Content-Type: {content_type}\r\n\
                 Content-Range: bytes {}-{}/{file_size}\r\n\
                 \r\n",
                range.start, range.end,
            )
        })
        .collect();
    let size = headers.iter().map(|h| h.len() as u64).sum();
    MultipartHeaders { headers, size }
}

/// The terminator written after the last part.
pub fn closing_boundary(boundary: &str) -> String {
    format!("\r\n--{boundary}--")
}

/// Exact `Content-Length` of a multipart body.
pub fn content_length(headers: &MultipartHeaders, total_length: u64, boundary: &str) -> u64 {
    headers.size + total_length + closing_boundary(boundary).len() as u64
}

/// A fresh boundary token for one response.
pub fn generate_boundary() -> String {
    Uuid::new_v4().to_string()
}

/// Pull the boundary parameter out of a `multipart/byteranges` content type.
pub fn extract_boundary(content_type: &str) -> Option<&str> {
    let mut params = content_type.split(';');
    let essence = params.next()?.trim();
    if !essence.eq_ignore_ascii_case("multipart/byteranges") {
        return None;
    }
    params
        .filter_map(|param| param.trim().split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_blocks() {
        let ranges = [ByteRange::new(0, 0), ByteRange::new(999, 999)];
        let built = build_headers(&ranges, "XYZ", "text/plain", 1000);

        assert_eq!(
            vec![
                "--XYZ\r\nContent-Type: text/plain\r\nContent-Range: bytes 0-0/1000\r\n\r\n",
                "\r\n--XYZ\r\nContent-Type: text/plain\r\nContent-Range: bytes 999-999/1000\r\n\r\n",
            ],
            built.headers
        );
        assert_eq!(
            built.headers.iter().map(String::len).sum::<usize>() as u64,
            built.size
        );
    }

    #[test]
    fn test_content_length_matches_body() {
        let content = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
        let ranges = [ByteRange::new(0, 9), ByteRange::new(20, 29), ByteRange::new(61, 61)];
        let boundary = generate_boundary();
        let built = build_headers(&ranges, &boundary, "application/octet-stream", 62);

        let mut body = Vec::new();
        for (header, range) in built.headers.iter().zip(&ranges) {
            body.extend_from_slice(header.as_bytes());
            body.extend_from_slice(&content[range.start as usize..=range.end as usize]);
        }
        body.extend_from_slice(closing_boundary(&boundary).as_bytes());

        let total_length = ranges.iter().map(ByteRange::len).sum();
        assert_eq!(body.len() as u64, content_length(&built, total_length, &boundary));
        assert!(body.ends_with(format!("z\r\n--{boundary}--").as_bytes()));
    }

    #[test]
    fn test_boundaries_are_unique() {
        let a = generate_boundary();
        let b = generate_boundary();
        assert_ne!(a, b);
        assert_eq!(36, a.len());
    }

    #[test]
    fn test_extract_boundary() {
        assert_eq!(Some("abc"), extract_boundary("multipart/byteranges; boundary=abc"));
        assert_eq!(Some("abc"), extract_boundary("multipart/byteranges;boundary=\"abc\""));
        assert_eq!(None, extract_boundary("text/plain; boundary=abc"));
        assert_eq!(None, extract_boundary("multipart/byteranges"));
    }
}
