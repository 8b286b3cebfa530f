#![no_main]

use arbitrary::Arbitrary;
use commonware_tls::{
    key_exchange::X25519,
    key_schedule::Rfc8446,
    message::{ContentType, RecordHeader},
    Config, Session, State,
};
use libfuzzer_sys::fuzz_target;
use rand::{rngs::StdRng, SeedableRng};

#[derive(Arbitrary, Debug)]
struct Record {
    content_type: u8,
    fragment: Vec<u8>,
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    seed: u64,
    records: Vec<Record>,
}

fn fuzz(input: FuzzInput) {
    let mut rng = StdRng::seed_from_u64(input.seed);
    let config = Config::new("example.com");
    let key_exchange = X25519::new(&mut rng);
    let mut session = Session::new(&config, key_exchange, Rfc8446::new()).unwrap();
    session.client_hello(&mut rng, &config.server_name).unwrap();
    session.hello_sent().unwrap();

    // Unauthenticated peer input must never complete the handshake
    for record in input.records {
        let Ok(length) = u16::try_from(record.fragment.len()) else {
            continue;
        };
        let header = RecordHeader {
            content_type: ContentType::from(record.content_type),
            version: 0x0303,
            length,
        };
        if session.receive(&header, &record.fragment).is_err() {
            assert_eq!(session.state(), State::Closed);
            return;
        }
        assert_ne!(session.state(), State::KeysDerived);
    }
}

fuzz_target!(|input: FuzzInput| {
    fuzz(input);
});
