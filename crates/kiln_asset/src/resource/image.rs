//! Netpbm image decoding (binary PPM `P6` and PAM `P7`)
//!
//! Decoded images are always expanded to 8-bit RGBA so the texture system
//! can upload them without caring about the source layout.

/// Decoded RGBA8 pixels, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub channel_count: u8,
    pub pixels: Vec<u8>,
}

impl ImageData {
    /// Whether any pixel has alpha below 255.
    pub fn has_transparency(&self) -> bool {
        self.channel_count == 4 && self.pixels.chunks_exact(4).any(|px| px[3] < 255)
    }
}

struct Header<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Header<'a> {
    fn skip_whitespace_and_comments(&mut self) {
        while let Some(&b) = self.bytes.get(self.pos) {
            if b == b'#' {
                while self.bytes.get(self.pos).is_some_and(|&c| c != b'\n') {
                    self.pos += 1;
                }
            } else if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn token(&mut self) -> Option<&'a str> {
        self.skip_whitespace_and_comments();
        let start = self.pos;
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|b| !b.is_ascii_whitespace())
        {
            self.pos += 1;
        }
        if start == self.pos {
            return None;
        }
        let bytes = self.bytes;
        std::str::from_utf8(&bytes[start..self.pos]).ok()
    }

    fn number(&mut self, what: &str) -> Result<u32, String> {
        let token = self.token().ok_or_else(|| format!("missing {what}"))?;
        token
            .parse()
            .map_err(|_| format!("invalid {what} '{token}'"))
    }

    /// Consume the single whitespace byte that ends a header line.
    fn end_of_header(&mut self) -> Result<&'a [u8], String> {
        let bytes = self.bytes;
        match bytes.get(self.pos) {
            Some(b) if b.is_ascii_whitespace() => Ok(&bytes[self.pos + 1..]),
            _ => Err("header is not terminated".to_string()),
        }
    }
}

/// Decode a binary PPM or PAM file to RGBA8.
pub fn decode_netpbm(bytes: &[u8]) -> Result<ImageData, String> {
    let mut header = Header { bytes, pos: 0 };
    match header.token() {
        Some("P6") => {
            let width = header.number("width")?;
            let height = header.number("height")?;
            let maxval = header.number("maxval")?;
            let body = header.end_of_header()?;
            expand(width, height, 3, maxval, body)
        }
        Some("P7") => {
            let (mut width, mut height, mut depth, mut maxval) = (None, None, None, None);
            loop {
                match header.token() {
                    Some("WIDTH") => width = Some(header.number("WIDTH")?),
                    Some("HEIGHT") => height = Some(header.number("HEIGHT")?),
                    Some("DEPTH") => depth = Some(header.number("DEPTH")?),
                    Some("MAXVAL") => maxval = Some(header.number("MAXVAL")?),
                    // The tuple type is implied by DEPTH.
                    Some("TUPLTYPE") => {
                        header.token();
                    }
                    Some("ENDHDR") => break,
                    Some(other) => return Err(format!("unknown PAM header field '{other}'")),
                    None => return Err("missing ENDHDR".to_string()),
                }
            }
            let body = header.end_of_header()?;
            expand(
                width.ok_or("missing WIDTH")?,
                height.ok_or("missing HEIGHT")?,
                depth.ok_or("missing DEPTH")?,
                maxval.ok_or("missing MAXVAL")?,
                body,
            )
        }
        Some(magic) => Err(format!("unsupported format '{magic}'")),
        None => Err("empty file".to_string()),
    }
}

fn expand(width: u32, height: u32, depth: u32, maxval: u32, body: &[u8]) -> Result<ImageData, String> {
    if width == 0 || height == 0 {
        return Err(format!("invalid dimensions {width}x{height}"));
    }
    if maxval == 0 || maxval > 255 {
        return Err(format!("unsupported maxval {maxval}"));
    }
    if !(1..=4).contains(&depth) {
        return Err(format!("unsupported depth {depth}"));
    }
    let pixel_count = width as usize * height as usize;
    let expected = pixel_count * depth as usize;
    if body.len() < expected {
        return Err(format!(
            "pixel data is {} bytes, expected {expected}",
            body.len()
        ));
    }

    let scale = |v: u8| -> u8 { (u32::from(v).min(maxval) * 255 / maxval) as u8 };
    let mut pixels = Vec::with_capacity(pixel_count * 4);
    for px in body[..expected].chunks_exact(depth as usize) {
        let rgba = match *px {
            [l] => [scale(l), scale(l), scale(l), 255],
            [l, a] => [scale(l), scale(l), scale(l), scale(a)],
            [r, g, b] => [scale(r), scale(g), scale(b), 255],
            [r, g, b, a] => [scale(r), scale(g), scale(b), scale(a)],
            _ => unreachable!("depth checked above"),
        };
        pixels.extend_from_slice(&rgba);
    }

    Ok(ImageData {
        width,
        height,
        channel_count: 4,
        pixels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ppm_with_comments() {
        let mut file = b"P6\n# made by hand\n2 1\n255\n".to_vec();
        file.extend_from_slice(&[255, 0, 0, 0, 0, 255]);
        let image = decode_netpbm(&file).unwrap();
        assert_eq!((image.width, image.height, image.channel_count), (2, 1, 4));
        assert_eq!(image.pixels, vec![255, 0, 0, 255, 0, 0, 255, 255]);
        assert!(!image.has_transparency());
    }

    #[test]
    fn decodes_pam_with_alpha() {
        let mut file =
            b"P7\nWIDTH 1\nHEIGHT 2\nDEPTH 4\nMAXVAL 255\nTUPLTYPE RGB_ALPHA\nENDHDR\n".to_vec();
        file.extend_from_slice(&[1, 2, 3, 255, 4, 5, 6, 128]);
        let image = decode_netpbm(&file).unwrap();
        assert_eq!(image.pixels.len(), 8);
        assert!(image.has_transparency());
    }

    #[test]
    fn rescales_small_maxval() {
        let mut file = b"P6 1 1 15\n".to_vec();
        file.extend_from_slice(&[15, 0, 5]);
        let image = decode_netpbm(&file).unwrap();
        assert_eq!(image.pixels, vec![255, 0, 85, 255]);
    }

    #[test]
    fn rejects_truncated_and_unknown_files() {
        assert!(decode_netpbm(b"P6 2 2 255\n\x00\x00").is_err());
        assert!(decode_netpbm(b"P3 1 1 255\n0 0 0").is_err());
        assert!(decode_netpbm(b"").is_err());
    }
}
