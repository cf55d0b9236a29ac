// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pairing-code and phone-number normalisation.

use tether_core::TetherError;

const GROUP: usize = 4;

/// Formats a raw pairing code for humans: `ABCD1234` becomes `ABCD-1234`.
///
/// Whitespace and existing dashes are dropped and letters upper-cased first,
/// so formatting an already formatted code is a no-op.
pub fn format_pairing_code(raw: &str) -> String {
    let cleaned: Vec<char> = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    cleaned
        .chunks(GROUP)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

/// Reduces a phone number to its digits (`+1 (555) 010-9999` -> `15550109999`).
pub fn normalize_phone(phone: &str) -> Result<String, TetherError> {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if !(7..=15).contains(&digits.len()) {
        return Err(TetherError::InvalidArgument(format!(
            "phone number `{phone}` must contain 7 to 15 digits"
        )));
    }
    Ok(digits)
}
