#![forbid(unsafe_code)]

/// Opaque composite entity key (e.g. `"bundle|1"` or `"0-j39j9|color"`).
/// The engine never interprets the content; it only requires a stable,
/// control-free string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn try_new(value: impl Into<String>) -> Result<Self, EntityIdError> {
        let value = value.into();
        validate_entity_id(&value)?;
        Ok(Self(value))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntityIdError {
    Empty,
    TooLong,
    ContainsControl,
}

impl EntityIdError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Empty => "entity id must not be empty",
            Self::TooLong => "entity id is too long",
            Self::ContainsControl => "entity id contains control characters",
        }
    }
}

fn validate_entity_id(value: &str) -> Result<(), EntityIdError> {
    if value.is_empty() {
        return Err(EntityIdError::Empty);
    }
    if value.len() > 512 {
        return Err(EntityIdError::TooLong);
    }
    if value.chars().any(|c| c.is_control()) {
        return Err(EntityIdError::ContainsControl);
    }
    Ok(())
}

/// Shared validation for the strict identifier alphabet used by file ids,
/// branch names and schema keys: leading alphanumeric, then alphanumeric,
/// `.`, `_`, `/` or `-`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentError {
    Empty,
    TooLong,
    InvalidFirstChar,
    InvalidChar { ch: char, index: usize },
}

impl IdentError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Empty => "identifier must not be empty",
            Self::TooLong => "identifier is too long",
            Self::InvalidFirstChar => "identifier must start with an alphanumeric character",
            Self::InvalidChar { .. } => "identifier contains an invalid character",
        }
    }
}

fn validate_ident(value: &str) -> Result<(), IdentError> {
    if value.is_empty() {
        return Err(IdentError::Empty);
    }
    if value.len() > 128 {
        return Err(IdentError::TooLong);
    }
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return Err(IdentError::Empty);
    };
    if !first.is_ascii_alphanumeric() {
        return Err(IdentError::InvalidFirstChar);
    }
    for (index, ch) in value.chars().enumerate() {
        if index == 0 {
            continue;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '/' | '-') {
            continue;
        }
        return Err(IdentError::InvalidChar { ch, index });
    }
    Ok(())
}

macro_rules! ident_newtype {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }

            pub fn try_new(value: impl Into<String>) -> Result<Self, IdentError> {
                let value = value.into();
                validate_ident(&value)?;
                Ok(Self(value))
            }
        }
    };
}

ident_newtype!(FileId);
ident_newtype!(BranchName);
ident_newtype!(SchemaKey);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_validation() {
        assert_eq!(EntityId::try_new("").unwrap_err(), EntityIdError::Empty);
        assert_eq!(
            EntityId::try_new("bad\u{0007}id").unwrap_err(),
            EntityIdError::ContainsControl
        );
        assert_eq!(
            EntityId::try_new("x".repeat(513)).unwrap_err(),
            EntityIdError::TooLong
        );
        // Composite keys with pipes are the common case.
        assert!(EntityId::try_new("bundle|1").is_ok());
        assert!(EntityId::try_new("0-j39j9|color").is_ok());
    }

    #[test]
    fn ident_validation() {
        assert_eq!(FileId::try_new("").unwrap_err(), IdentError::Empty);
        assert_eq!(
            FileId::try_new("-leading").unwrap_err(),
            IdentError::InvalidFirstChar
        );
        assert_eq!(
            BranchName::try_new("has space").unwrap_err(),
            IdentError::InvalidChar { ch: ' ', index: 3 }
        );
        assert!(FileId::try_new("db.sqlite").is_ok());
        assert!(BranchName::try_new("feature/translations").is_ok());
        assert!(SchemaKey::try_new("table_rows_v1").is_ok());
    }
}
