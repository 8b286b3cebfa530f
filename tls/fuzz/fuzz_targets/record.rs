#![no_main]

use bytes::BytesMut;
use commonware_codec::{Decode, Encode};
use commonware_tls::{
    message::{next_message, next_record, HandshakeMessage, MAX_HANDSHAKE_LENGTH},
    LengthWidth,
};
use libfuzzer_sys::fuzz_target;

fn fuzz(data: &[u8]) {
    // Split the input into records, then reassemble handshake messages from their fragments
    let mut records = BytesMut::from(data);
    let mut pending = BytesMut::new();
    let mut offset = 0;
    while let Some((header, fragment)) = next_record(&mut records) {
        assert_eq!(header.length as usize, fragment.len());
        assert_eq!(header.encode().as_ref(), &data[offset..offset + 5]);
        offset += 5 + fragment.len();
        pending.extend_from_slice(&fragment);
        loop {
            match next_message(&mut pending, MAX_HANDSHAKE_LENGTH) {
                Ok(Some(raw)) => {
                    let message = HandshakeMessage::decode_cfg(raw.clone(), &LengthWidth::Standard)
                        .expect("framed message must decode");
                    assert_eq!(message.body().len() + 4, raw.len());
                    assert_eq!(message.encode().as_ref(), raw.as_ref());
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
}

fuzz_target!(|input: &[u8]| {
    fuzz(input);
});
