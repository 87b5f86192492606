use rand::{CryptoRng, Rng};

const KEY_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const KEY_GROUPS: usize = 4;
const KEY_GROUP_LEN: usize = 4;

/// Builds a redemption key of the form `XXXX-XXXX-XXXX-XXXX` over `[A-Z0-9]`.
///
/// The generator must be cryptographically secure; the key is what the buyer
/// hands over to redeem a paid item.
pub fn generate_redemption_key<R: Rng + CryptoRng>(rng: &mut R) -> String {
    let mut key = String::with_capacity(KEY_GROUPS * KEY_GROUP_LEN + KEY_GROUPS - 1);
    for i in 0..KEY_GROUPS * KEY_GROUP_LEN {
        if i > 0 && i % KEY_GROUP_LEN == 0 {
            key.push('-');
        }
        let index = rng.gen_range(0..KEY_ALPHABET.len());
        key.push(KEY_ALPHABET[index] as char);
    }
    key
}

// Checks the shape produced by generate_redemption_key.
pub fn is_valid_redemption_key(key: &str) -> bool {
    let groups: Vec<&str> = key.split('-').collect();
    groups.len() == KEY_GROUPS
        && groups.iter().all(|group| {
            group.len() == KEY_GROUP_LEN
                && group
                    .bytes()
                    .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        })
}
