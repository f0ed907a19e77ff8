//! Just enough OpenPGP to read the text of an armored signed message.
//!
//! Signatures are not verified here, the data centers do that when the
//! token is exchanged.

use std::io::Read;

use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::{DeflateDecoder, ZlibDecoder};

use crate::result::{Error, Result};

const MESSAGE_HEADER: &str = "-----BEGIN PGP MESSAGE-----";
const SIGNED_HEADER: &str = "-----BEGIN PGP SIGNED MESSAGE-----";
const SIGNATURE_HEADER: &str = "-----BEGIN PGP SIGNATURE-----";

const TAG_COMPRESSED: u8 = 8;
const TAG_LITERAL: u8 = 11;

/// Extract the signed text of an ASCII-armored OpenPGP message.
///
/// Both the clearsigned form and the binary signed message form are accepted.
pub fn read_armored_text(armored: &str) -> Result<String> {
    let armored = armored.trim();

    if armored.starts_with(SIGNED_HEADER) {
        read_clearsigned(armored)
    } else if armored.starts_with(MESSAGE_HEADER) {
        let packets = dearmor(armored)?;
        let data = find_literal(&packets, 0)?
            .ok_or_else(|| Error::invalid_credential("No auth data"))?;
        String::from_utf8(data).map_err(|_| Error::invalid_credential("auth data is not UTF-8"))
    } else {
        Err(Error::invalid_credential("not an armored PGP message"))
    }
}

fn read_clearsigned(armored: &str) -> Result<String> {
    let mut lines = armored.lines().skip(1);

    // Armor headers ("Hash: ...") end with an empty line
    for line in lines.by_ref() {
        if line.trim().is_empty() {
            break;
        }
    }

    let mut text = Vec::new();
    let mut signed = false;
    for line in lines {
        if line.starts_with(SIGNATURE_HEADER) {
            signed = true;
            break;
        }
        text.push(line.strip_prefix("- ").unwrap_or(line));
    }

    if !signed {
        return Err(Error::invalid_credential("signature block missing"));
    }
    Ok(text.join("\n"))
}

/// Decode the base64 body of the armor, dropping the headers and the checksum
fn dearmor(armored: &str) -> Result<Vec<u8>> {
    let mut lines = armored.lines().skip(1).map(str::trim);
    let mut body = String::new();

    // Headers are optional, the body starts after the first empty line if there is one
    let has_headers = armored.lines().skip(1).any(|line| line.contains(": "));
    if has_headers {
        for line in lines.by_ref() {
            if line.is_empty() {
                break;
            }
        }
    }

    for line in lines {
        if line.starts_with("-----END") || (line.starts_with('=') && line.len() == 5) {
            break;
        }
        body.push_str(line);
    }

    STANDARD
        .decode(body)
        .map_err(|err| Error::invalid_credential(format!("bad armor encoding: {err}")))
}

/// Walk the packet sequence and return the content of the first literal data packet,
/// looking inside compressed packets.
fn find_literal(mut data: &[u8], depth: usize) -> Result<Option<Vec<u8>>> {
    // A compressed packet containing a compressed packet is already suspicious
    if depth > 2 {
        return Err(Error::invalid_credential("packets nested too deeply"));
    }

    while !data.is_empty() {
        let (tag, body, rest) = next_packet(data)?;
        data = rest;

        match tag {
            TAG_LITERAL => return literal_content(&body).map(Some),
            TAG_COMPRESSED => {
                let inner = decompress(&body)?;
                if let Some(found) = find_literal(&inner, depth + 1)? {
                    return Ok(Some(found));
                }
            }
            _ => {}
        }
    }

    Ok(None)
}

fn truncated() -> Error {
    Error::invalid_credential("truncated packet")
}

fn take(data: &[u8], n: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < n {
        Err(truncated())
    } else {
        Ok(data.split_at(n))
    }
}

fn be_len(bytes: &[u8]) -> usize {
    bytes.iter().fold(0, |acc, b| (acc << 8) | *b as usize)
}

/// Split the next packet: its tag, its (reassembled) body and the remaining input
fn next_packet(data: &[u8]) -> Result<(u8, Vec<u8>, &[u8])> {
    let (&ctb, mut rest) = data.split_first().ok_or_else(truncated)?;
    if ctb & 0x80 == 0 {
        return Err(Error::invalid_credential("not an OpenPGP packet"));
    }

    if ctb & 0x40 == 0 {
        // Old format
        let tag = (ctb >> 2) & 0x0f;
        let len = match ctb & 0x03 {
            0 => 1,
            1 => 2,
            2 => 4,
            _ => return Ok((tag, rest.to_vec(), &[][..])),
        };
        let (len, after) = take(rest, len)?;
        let (body, after) = take(after, be_len(len))?;
        return Ok((tag, body.to_vec(), after));
    }

    // New format, possibly split in partial body chunks
    let tag = ctb & 0x3f;
    let mut body = Vec::new();
    loop {
        let (&first, after) = rest.split_first().ok_or_else(truncated)?;
        let (len, partial, after) = match first {
            0..=191 => (first as usize, false, after),
            192..=223 => {
                let (&second, after) = after.split_first().ok_or_else(truncated)?;
                ((((first as usize) - 192) << 8) + second as usize + 192, false, after)
            }
            255 => {
                let (len, after) = take(after, 4)?;
                (be_len(len), false, after)
            }
            _ => (1 << (first & 0x1f), true, after),
        };

        let (chunk, after) = take(after, len)?;
        body.extend_from_slice(chunk);
        rest = after;

        if !partial {
            return Ok((tag, body, rest));
        }
    }
}

fn literal_content(body: &[u8]) -> Result<Vec<u8>> {
    // format (1), filename length (1), filename, date (4), data
    let (header, rest) = take(body, 2)?;
    let (_filename, rest) = take(rest, header[1] as usize)?;
    let (_date, content) = take(rest, 4)?;
    Ok(content.to_vec())
}

fn decompress(body: &[u8]) -> Result<Vec<u8>> {
    let (&algorithm, compressed) = body.split_first().ok_or_else(truncated)?;
    let mut out = Vec::new();

    let res = match algorithm {
        0 => {
            out.extend_from_slice(compressed);
            Ok(0)
        }
        1 => DeflateDecoder::new(compressed).read_to_end(&mut out),
        2 => ZlibDecoder::new(compressed).read_to_end(&mut out),
        n => {
            return Err(Error::invalid_credential(format!(
                "unsupported compression algorithm {n}"
            )))
        }
    };

    res.map_err(|err| Error::invalid_credential(format!("could not decompress: {err}")))?;
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;

    use flate2::{write::ZlibEncoder, Compression};

    use super::*;

    /// New-format literal data packet holding `text`
    pub(crate) fn literal_packet(text: &str) -> Vec<u8> {
        let mut body = vec![b'b', 0];
        body.extend_from_slice(&[0, 0, 0, 0]);
        body.extend_from_slice(text.as_bytes());

        let mut packet = vec![0xc0 | TAG_LITERAL];
        push_new_len(&mut packet, body.len());
        packet.extend(body);
        packet
    }

    fn push_new_len(packet: &mut Vec<u8>, len: usize) {
        if len < 192 {
            packet.push(len as u8);
        } else {
            packet.push(255);
            packet.extend_from_slice(&(len as u32).to_be_bytes());
        }
    }

    /// Armor the packets the way `gpg --armor` does
    pub(crate) fn armor(packets: &[u8]) -> String {
        let encoded = STANDARD.encode(packets);
        let mut out = format!("{MESSAGE_HEADER}\nVersion: GnuPG v2\n\n");
        for chunk in encoded.as_bytes().chunks(64) {
            out.push_str(std::str::from_utf8(chunk).unwrap());
            out.push('\n');
        }
        out.push_str("=AAAA\n-----END PGP MESSAGE-----\n");
        out
    }

    #[test]
    fn reads_plain_literal() {
        let token = armor(&literal_packet(r#"{"mail":"a@b.c"}"#));
        assert_eq!(read_armored_text(&token).unwrap(), r#"{"mail":"a@b.c"}"#);
    }

    #[test]
    fn reads_compressed_literal_after_other_packets() {
        let text = "x".repeat(300);

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&literal_packet(&text)).unwrap();
        let mut compressed = vec![2];
        compressed.extend(encoder.finish().unwrap());

        // Old-format marker packet (tag 10) first, then the compressed packet
        let mut packets = vec![0x80 | (10 << 2), 3, b'P', b'G', b'P'];
        packets.push(0xc0 | TAG_COMPRESSED);
        push_new_len(&mut packets, compressed.len());
        packets.extend(compressed);

        assert_eq!(read_armored_text(&armor(&packets)).unwrap(), text);
    }

    #[test]
    fn reads_clearsigned() {
        let token = "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA256\n\n\
            {\"mail\": \"a@b.c\"}\n- -dashed\n\
            -----BEGIN PGP SIGNATURE-----\nabc\n-----END PGP SIGNATURE-----\n";
        assert_eq!(
            read_armored_text(token).unwrap(),
            "{\"mail\": \"a@b.c\"}\n-dashed"
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(read_armored_text("hello").is_err());
        assert!(read_armored_text(&armor(&[0x01, 0x02])).is_err());
        // Packet announcing more bytes than available
        assert!(read_armored_text(&armor(&[0xcb, 50, b'b'])).is_err());
    }
}
