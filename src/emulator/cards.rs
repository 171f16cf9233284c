//! Simulated card presentation.
//!
//! When a request carries no account number the emulator "presents" a card
//! from a fixed table, keyed by the allocated transaction number, so the
//! same sequence of operations always sees the same card data.

use super::store::CardAcquisition;

#[derive(Debug, Clone, Copy)]
pub struct SimCard {
    pub pan: &'static str,
    pub card_type: &'static str,
}

const SIM_CARDS: &[SimCard] = &[
    SimCard {
        pan: "4761739001010119",
        card_type: "Visa",
    },
    SimCard {
        pan: "5413330089604111",
        card_type: "Mastercard",
    },
    SimCard {
        pan: "374245455400126",
        card_type: "Amex",
    },
    SimCard {
        pan: "6011000991300009",
        card_type: "Discover",
    },
];

const ACQUISITIONS: &[CardAcquisition] = &[
    CardAcquisition::Tap,
    CardAcquisition::Insert,
    CardAcquisition::Swipe,
];

/// Pick the simulated card for the `seq`-th transaction.
pub fn present(seq: u64) -> SimCard {
    SIM_CARDS[(seq as usize) % SIM_CARDS.len()]
}

/// Pick the simulated acquisition method for the `seq`-th transaction.
pub fn acquisition(seq: u64) -> CardAcquisition {
    ACQUISITIONS[(seq as usize) % ACQUISITIONS.len()]
}

/// Card brand from the leading digit of a manually keyed PAN.
pub fn card_type_of(pan: &str) -> &'static str {
    match pan.as_bytes().first() {
        Some(b'4') => "Visa",
        Some(b'5') => "Mastercard",
        Some(b'3') => "Amex",
        Some(b'6') => "Discover",
        _ => "Unknown",
    }
}

/// Mask a PAN as first six + `******` + last four.
pub fn mask_pan(pan: &str) -> String {
    let digits: String = pan.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 10 {
        return "******".to_string();
    }
    format!(
        "{}******{}",
        &digits[..6],
        &digits[digits.len() - 4..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_is_deterministic() {
        let a = present(7);
        let b = present(7);
        assert_eq!(a.pan, b.pan);
        assert_eq!(present(0).card_type, "Visa");
    }

    #[test]
    fn test_mask_pan() {
        assert_eq!(mask_pan("4761739001010119"), "476173******0119");
        assert_eq!(mask_pan("374245455400126"), "374245******0126");
        assert_eq!(mask_pan("1234"), "******");
    }

    #[test]
    fn test_card_type_of() {
        assert_eq!(card_type_of("4111111111110001"), "Visa");
        assert_eq!(card_type_of("5500000000000004"), "Mastercard");
        assert_eq!(card_type_of("9999"), "Unknown");
    }
}
