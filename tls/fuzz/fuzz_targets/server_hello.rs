#![no_main]

use commonware_codec::{DecodeExt, Encode};
use commonware_tls::hello::ServerHello;
use libfuzzer_sys::fuzz_target;

fn fuzz(data: &[u8]) {
    let Ok(hello) = ServerHello::decode(data) else {
        return;
    };

    // Anything we accept must be re-encoded identically
    assert_eq!(hello.encode().as_ref(), data);
    let _ = hello.is_retry_request();
    let _ = hello.selected_version();
    let _ = hello.key_share();
}

fuzz_target!(|input: &[u8]| {
    fuzz(input);
});
