//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest card or prompt text accepted from clients.
pub const MAX_CARD_LEN: u64 = 280;

/// Validates that every card is non-blank and at most [`MAX_CARD_LEN`] characters.
pub fn validate_cards(cards: &[String]) -> Result<(), ValidationError> {
    if let Some(index) = cards.iter().position(|card| card.trim().is_empty()) {
        let mut err = ValidationError::new("card_blank");
        err.message = Some(format!("Card {index} must not be blank").into());
        return Err(err);
    }

    if let Some(index) = cards
        .iter()
        .position(|card| card.chars().count() as u64 > MAX_CARD_LEN)
    {
        let mut err = ValidationError::new("card_length");
        err.message =
            Some(format!("Card {index} exceeds {MAX_CARD_LEN} characters").into());
        return Err(err);
    }

    Ok(())
}
