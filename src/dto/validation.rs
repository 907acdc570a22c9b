//! Validation helpers for DTOs.

use validator::ValidationError;

/// Validates that a player ID is 1 to 64 characters of lowercase
/// alphanumerics, `-`, or `_`.
///
/// # Examples
///
/// ```ignore
/// validate_player_id("player-42")  // Ok
/// validate_player_id("")           // Err - empty
/// validate_player_id("Player 42")  // Err - uppercase and space
/// ```
pub fn validate_player_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > 64 {
        let mut err = ValidationError::new("player_id_length");
        err.message =
            Some(format!("Player ID must be 1 to 64 characters (got {})", id.len()).into());
        return Err(err);
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        let mut err = ValidationError::new("player_id_format");
        err.message = Some(
            "Player ID must contain only lowercase alphanumerics, `-`, or `_`"
                .to_owned()
                .into(),
        );
        return Err(err);
    }

    Ok(())
}
