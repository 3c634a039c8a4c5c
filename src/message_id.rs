use rand::RngCore;

/// Random bytes behind each id; hex-encoded they give 18 characters.
const ID_RANDOM_BYTES: usize = 9;

/// A fresh id for a locally created message, shaped like web-client ids:
/// `3EB0` followed by uppercase hex.
pub fn new_message_id() -> String {
    let mut bytes = [0u8; ID_RANDOM_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    format!("3EB0{}", hex::encode_upper(bytes))
}
