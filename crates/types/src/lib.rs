//! Validated primitive types shared across the HMS crates.
//!
//! Every type here can only be constructed through a checking constructor, so holding one is
//! proof that the value passed validation.

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
    /// The input was not a recognisable mobile number
    #[error("Invalid phone number: {0}")]
    InvalidPhone(String),
}

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace character.
/// The input is automatically trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// # Errors
    ///
    /// Returns `Err(TextError::Empty)` if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// A Kenyan mobile number in the international `2547XXXXXXXX` / `2541XXXXXXXX` form that the
/// mobile-money gateway expects as `PartyA` and `PhoneNumber`.
///
/// Accepted inputs are the international form (with or without a leading `+`) and the local
/// `07XXXXXXXX` / `01XXXXXXXX` forms. Spaces and hyphens are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    const COUNTRY_CODE: &'static str = "254";

    /// Parses and normalises a mobile number.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::InvalidPhone`] when the digits do not form a 12-digit `254` number
    /// whose subscriber part starts with 7 or 1.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, TextError> {
        let raw = input.as_ref().trim();
        let compact: String = raw
            .chars()
            .filter(|c| !matches!(c, ' ' | '-'))
            .collect();
        let digits = compact.strip_prefix('+').unwrap_or(&compact);

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TextError::InvalidPhone(raw.to_owned()));
        }

        let normalised = if let Some(local) = digits.strip_prefix('0') {
            format!("{}{}", Self::COUNTRY_CODE, local)
        } else {
            digits.to_owned()
        };

        let subscriber = normalised
            .strip_prefix(Self::COUNTRY_CODE)
            .ok_or_else(|| TextError::InvalidPhone(raw.to_owned()))?;

        if subscriber.len() != 9 || !matches!(subscriber.as_bytes()[0], b'7' | b'1') {
            return Err(TextError::InvalidPhone(raw.to_owned()));
        }

        Ok(Self(normalised))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PhoneNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for PhoneNumber {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for PhoneNumber {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        PhoneNumber::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty_text_trims_input() {
        let text = NonEmptyText::new("  Paracetamol  ").expect("should accept padded text");
        assert_eq!(text.as_str(), "Paracetamol");
    }

    #[test]
    fn test_non_empty_text_rejects_whitespace() {
        assert_eq!(NonEmptyText::new("   "), Err(TextError::Empty));
    }

    #[test]
    fn test_non_empty_text_deserialize_rejects_empty() {
        let result: Result<NonEmptyText, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_phone_accepts_international_form() {
        let phone = PhoneNumber::parse("254712345678").expect("should parse");
        assert_eq!(phone.as_str(), "254712345678");
    }

    #[test]
    fn test_phone_normalises_local_and_plus_forms() {
        assert_eq!(
            PhoneNumber::parse("0712 345 678").unwrap().as_str(),
            "254712345678"
        );
        assert_eq!(
            PhoneNumber::parse("+254-110-123456").unwrap().as_str(),
            "254110123456"
        );
    }

    #[test]
    fn test_phone_rejects_landline_and_garbage() {
        assert!(PhoneNumber::parse("254201234567").is_err());
        assert!(PhoneNumber::parse("07123").is_err());
        assert!(PhoneNumber::parse("not a number").is_err());
        assert!(PhoneNumber::parse("").is_err());
    }
}
