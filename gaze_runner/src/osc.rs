// Minimal OSC 1.0 message encoding: one address, a type tag string and the
// arguments, each section padded with NULs to a multiple of four bytes. Only the
// argument types the telemetry needs are supported.

use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OscArg {
    /// `f`: 32-bit big-endian IEEE 754.
    Float(f32),
    /// `T` or `F`: no payload bytes.
    Bool(bool),
}

impl OscArg {
    fn type_tag(self) -> u8 {
        match self {
            OscArg::Float(_) => b'f',
            OscArg::Bool(true) => b'T',
            OscArg::Bool(false) => b'F',
        }
    }
}

/// OSC string: the bytes, a terminating NUL, then NULs up to a 4-byte boundary.
fn put_osc_string(buf: &mut BytesMut, s: &[u8]) {
    buf.put_slice(s);
    let padded = (s.len() / 4 + 1) * 4;
    buf.put_bytes(0, padded - s.len());
}

pub fn encode_message(address: &str, args: &[OscArg]) -> Bytes {
    let mut buf = BytesMut::with_capacity(address.len() + args.len() * 5 + 8);
    put_osc_string(&mut buf, address.as_bytes());

    let mut tags = Vec::with_capacity(args.len() + 1);
    tags.push(b',');
    tags.extend(args.iter().map(|arg| arg.type_tag()));
    put_osc_string(&mut buf, &tags);

    for arg in args {
        if let OscArg::Float(value) = arg {
            buf.put_f32(*value);
        }
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_message_layout() {
        let packet = encode_message("/a", &[OscArg::Float(1.0)]);
        assert_eq!(&packet[..], b"/a\0\0,f\0\0\x3f\x80\x00\x00");
    }

    #[test]
    fn address_of_four_bytes_gets_a_full_padding_word() {
        let packet = encode_message("/abc", &[OscArg::Float(-0.5)]);
        assert_eq!(&packet[..8], b"/abc\0\0\0\0");
        assert_eq!(&packet[8..12], b",f\0\0");
        assert_eq!(&packet[12..], &(-0.5f32).to_be_bytes());
    }

    #[test]
    fn booleans_are_tag_only() {
        let on = encode_message("/avatar/parameters/EyesClosed", &[OscArg::Bool(true)]);
        let off = encode_message("/avatar/parameters/EyesClosed", &[OscArg::Bool(false)]);
        // 29-byte address pads to 32, type tags pad to 4, no payload.
        assert_eq!(on.len(), 36);
        assert_eq!(&on[32..], b",T\0\0");
        assert_eq!(&off[32..], b",F\0\0");
    }

    #[test]
    fn packets_are_word_aligned() {
        for address in ["/x", "/xy", "/xyz", "/avatar/parameters/EyeX"] {
            let packet = encode_message(address, &[OscArg::Float(0.25), OscArg::Bool(false)]);
            assert_eq!(packet.len() % 4, 0, "{address}");
        }
    }
}
