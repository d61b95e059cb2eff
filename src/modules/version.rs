//! Токены версий.
//!
//! Версия разбирается «мягко»: никакой валидации semver, только разбиение
//! на `major.minor.patch[-prerelease]` с выбрасыванием нецифровых символов.
//! Строки, не начинающиеся с цифры (`any` и прочие алиасы), дают токен,
//! у которого заполнено только поле `raw`.

use std::fmt;

use serde::Serialize;

/// Один кандидат версии из списка `@1.2.3|any`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionToken {
    /// Исходная строка
    pub raw: String,
    pub major: Option<String>,
    pub minor: Option<String>,
    pub patch: Option<String>,
    pub prerelease: Option<String>,
}

impl VersionToken {
    /// Разобрать строку версии. Никогда не завершается ошибкой.
    pub fn parse(input: &str) -> Self {
        let mut token = Self {
            raw: input.to_string(),
            major: None,
            minor: None,
            patch: None,
            prerelease: None,
        };

        let starts_with_digit = input.chars().next().is_some_and(|c| c.is_ascii_digit());
        if !starts_with_digit {
            return token;
        }

        let parts: Vec<&str> = input.split('.').collect();
        token.major = parts.first().and_then(|p| digits_only(p));
        token.minor = parts.get(1).and_then(|p| digits_only(p));

        if parts.len() > 2 {
            // "3-beta.1" был разрезан по точкам, склеиваем обратно
            let tail = parts[2..].join(".");
            match tail.split_once('-') {
                Some((patch, prerelease)) => {
                    token.patch = digits_only(patch);
                    token.prerelease = Some(prerelease.to_string());
                }
                None => token.patch = digits_only(&tail),
            }
        }

        token
    }

    /// Версия «конкретна», если известны все три числовые компоненты.
    pub fn is_specific(&self) -> bool {
        self.major.is_some() && self.minor.is_some() && self.patch.is_some()
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn digits_only(segment: &str) -> Option<String> {
    let digits: String = segment.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_version() {
        let v = VersionToken::parse("1.2.3");
        assert_eq!(v.major.as_deref(), Some("1"));
        assert_eq!(v.minor.as_deref(), Some("2"));
        assert_eq!(v.patch.as_deref(), Some("3"));
        assert_eq!(v.prerelease, None);
        assert!(v.is_specific());
    }

    #[test]
    fn test_parse_prerelease_with_dots() {
        let v = VersionToken::parse("1.2.3-beta.1");
        assert_eq!(v.patch.as_deref(), Some("3"));
        assert_eq!(v.prerelease.as_deref(), Some("beta.1"));
        assert!(v.is_specific());
    }

    #[test]
    fn test_parse_alias() {
        let v = VersionToken::parse("blah");
        assert_eq!(v.raw, "blah");
        assert_eq!(v.major, None);
        assert_eq!(v.minor, None);
        assert_eq!(v.patch, None);
        assert_eq!(v.prerelease, None);
        assert!(!v.is_specific());
    }

    #[test]
    fn test_wildcard_is_not_specific() {
        let v = VersionToken::parse("1.2.x");
        assert_eq!(v.minor.as_deref(), Some("2"));
        assert_eq!(v.patch, None);
        assert!(!v.is_specific());
    }

    #[test]
    fn test_partial_versions() {
        assert!(!VersionToken::parse("1").is_specific());
        assert!(!VersionToken::parse("1.2").is_specific());
        assert!(!VersionToken::parse("1.2.").is_specific());
        assert!(!VersionToken::parse("").is_specific());
    }

    #[test]
    fn test_non_digits_are_stripped() {
        let v = VersionToken::parse("1a.2b.3c");
        assert_eq!(v.major.as_deref(), Some("1"));
        assert_eq!(v.minor.as_deref(), Some("2"));
        assert_eq!(v.patch.as_deref(), Some("3"));
        assert_eq!(v.raw, "1a.2b.3c");
    }
}
