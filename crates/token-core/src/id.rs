//! 令牌值生成与格式校验

use std::fmt;
use uuid::Uuid;

/// 令牌值生成器
///
/// `is_well_formed` 是访问存储前的第一道关卡，格式错误的值不会触达存储
pub trait IdGenerator: Send + Sync {
    /// 生成新的令牌值
    fn generate(&self) -> String;

    /// 检查令牌值格式
    fn is_well_formed(&self, value: &str) -> bool;
}

/// 基于 UUIDv7 的生成器
///
/// 32 位小写十六进制，按时间有序、可字典序排序；
/// 同一进程内生成的值严格递增
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidV7Generator;

impl IdGenerator for UuidV7Generator {
    fn generate(&self) -> String {
        Uuid::now_v7().simple().to_string()
    }

    fn is_well_formed(&self, value: &str) -> bool {
        value.len() == 32
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
            && Uuid::try_parse(value).is_ok_and(|uuid| uuid.get_version_num() == 7)
    }
}

/// 由一对闭包组成的生成器
pub struct FnGenerator<G, C> {
    make: G,
    check: C,
}

impl<G, C> FnGenerator<G, C>
where
    G: Fn() -> String + Send + Sync,
    C: Fn(&str) -> bool + Send + Sync,
{
    pub fn new(make: G, check: C) -> Self {
        Self { make, check }
    }
}

impl<G, C> IdGenerator for FnGenerator<G, C>
where
    G: Fn() -> String + Send + Sync,
    C: Fn(&str) -> bool + Send + Sync,
{
    fn generate(&self) -> String {
        (self.make)()
    }

    fn is_well_formed(&self, value: &str) -> bool {
        (self.check)(value)
    }
}

impl<G, C> fmt::Debug for FnGenerator<G, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnGenerator")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_values_are_well_formed() {
        let generator = UuidV7Generator;
        let value = generator.generate();
        assert_eq!(value.len(), 32);
        assert!(generator.is_well_formed(&value));
    }

    #[test]
    fn test_generated_values_are_strictly_ordered() {
        let generator = UuidV7Generator;
        let values: Vec<String> = (0..1000).map(|_| generator.generate()).collect();
        assert!(values.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_rejects_malformed_values() {
        let generator = UuidV7Generator;
        let v4 = Uuid::new_v4().simple().to_string();
        let v7 = generator.generate();

        assert!(!generator.is_well_formed(""));
        assert!(!generator.is_well_formed("not-a-token"));
        assert!(!generator.is_well_formed(&v4));
        assert!(!generator.is_well_formed(&v7.to_uppercase()));
        assert!(!generator.is_well_formed(&Uuid::now_v7().hyphenated().to_string()));
        assert!(!generator.is_well_formed(&format!("{}:x", &v7[..30])));
    }

    #[test]
    fn test_fn_generator() {
        let generator = FnGenerator::new(|| "abc".to_string(), |s: &str| s.starts_with('a'));
        assert_eq!(generator.generate(), "abc");
        assert!(generator.is_well_formed("a1"));
        assert!(!generator.is_well_formed("b1"));
    }
}
