//! Random nickname generator.
//!
//! Produces nicknames in the format `aXXXXXXXX`: a letter followed by eight
//! characters from `[0-9A-Z]`, which fits IRC's typical 9-character limit and
//! never starts with a digit.

use rand::RngExt;

const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const TOKEN_LEN: usize = 8;

/// Generate a random nickname like `a3KX09ZQ1`.
pub fn generate_nickname() -> String {
    let mut rng = rand::rng();
    let mut nick = String::with_capacity(TOKEN_LEN + 1);
    nick.push('a');
    for _ in 0..TOKEN_LEN {
        nick.push(ALPHABET[rng.random_range(0..ALPHABET.len())] as char);
    }
    nick
}
