use rand::Rng;
use rand::distr::Alphanumeric;

/// Length of the correlation tokens attached to outbound gateway requests.
pub const TRANSACTION_ID_LEN: usize = 12;

/// Generates a random `[A-Za-z0-9]` token of `len` characters.
pub fn generate_transaction_id(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Shorthand for a token of the default length.
pub fn new_transaction() -> String {
    generate_transaction_id(TRANSACTION_ID_LEN)
}
