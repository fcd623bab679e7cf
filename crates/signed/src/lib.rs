//! tessera-signed - 无状态签名令牌
//!
//! 不依赖共享存储：声明序列化为 JSON，用 HMAC-SHA256 签名，
//! 线上格式为 `base64url(json) + "." + hex(mac)`。
//! 一旦签发无法撤销，只能等待到期。

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tessera_errors::{TokenError, TokenResult};

type HmacSha256 = Hmac<Sha256>;

/// `0` 表示未设置
fn is_unset(ts: &i64) -> bool {
    *ts == 0
}

/// 签名令牌携带的声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedClaims<T> {
    pub data: T,
    /// 生效时间（Unix 秒），0 表示立即生效
    #[serde(default, skip_serializing_if = "is_unset")]
    pub activated_at: i64,
    /// 到期时间（Unix 秒），0 表示永不到期
    #[serde(default, skip_serializing_if = "is_unset")]
    pub expires_at: i64,
}

impl<T> SignedClaims<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            activated_at: 0,
            expires_at: 0,
        }
    }

    pub fn with_activation(mut self, activated_at: i64) -> Self {
        self.activated_at = activated_at;
        self
    }

    pub fn with_expiry(mut self, expires_at: i64) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn is_activated(&self) -> bool {
        window_activated(self.activated_at, Utc::now().timestamp())
    }

    pub fn is_expired(&self) -> bool {
        window_expired(self.expires_at, Utc::now().timestamp())
    }

    /// 已生效且未到期
    pub fn is_valid(&self) -> bool {
        self.is_activated() && !self.is_expired()
    }
}

fn window_activated(activated_at: i64, now: i64) -> bool {
    activated_at <= now
}

fn window_expired(expires_at: i64, now: i64) -> bool {
    expires_at != 0 && expires_at < now
}

/// 只读取时间窗口，不反序列化业务数据
#[derive(Deserialize)]
struct Window {
    #[serde(default)]
    activated_at: i64,
    #[serde(default)]
    expires_at: i64,
}

/// 签名令牌编解码器
pub struct SignedTokenCodec {
    secret: Secret<String>,
}

impl std::fmt::Debug for SignedTokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedTokenCodec")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl SignedTokenCodec {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Secret::new(secret.into()),
        }
    }

    fn mac(&self) -> TokenResult<HmacSha256> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| TokenError::encoding(format!("invalid signing key: {}", e)))
    }

    /// 序列化并签名
    pub fn encode<T: Serialize>(&self, claims: &SignedClaims<T>) -> TokenResult<String> {
        let json = serde_json::to_vec(claims)
            .map_err(|e| TokenError::encoding(format!("failed to serialize claims: {}", e)))?;

        let mut mac = self.mac()?;
        mac.update(&json);
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", URL_SAFE_NO_PAD.encode(&json), signature))
    }

    /// 拆分令牌并校验签名，返回声明的 JSON 字节
    ///
    /// 签名比较是常量时间的
    fn verified_bytes(&self, token: &str) -> TokenResult<Vec<u8>> {
        let (body, signature) = token.split_once('.').ok_or(TokenError::InvalidToken)?;
        if body.is_empty() || signature.contains('.') {
            return Err(TokenError::InvalidToken);
        }

        let json = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| TokenError::InvalidToken)?;
        let signature = hex::decode(signature).map_err(|_| TokenError::InvalidToken)?;

        let mut mac = self.mac()?;
        mac.update(&json);
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::SignatureMismatch)?;

        Ok(json)
    }

    /// 校验签名并解析声明（不检查时间窗口）
    pub fn decode<T: DeserializeOwned>(&self, token: &str) -> TokenResult<SignedClaims<T>> {
        let json = self.verified_bytes(token)?;
        serde_json::from_slice(&json).map_err(|_| TokenError::InvalidToken)
    }

    /// 只校验签名；`check_expiry` 为 true 时同时检查时间窗口
    ///
    /// 检查时间窗口时，没有到期时间或尚未生效返回 `InvalidToken`，已到期返回 `Expired`
    pub fn verify(&self, token: &str, check_expiry: bool) -> TokenResult<()> {
        let json = self.verified_bytes(token)?;
        if !check_expiry {
            return Ok(());
        }

        let window: Window = serde_json::from_slice(&json).map_err(|_| TokenError::InvalidToken)?;
        if is_unset(&window.expires_at) {
            return Err(TokenError::InvalidToken);
        }
        let now = Utc::now().timestamp();
        if !window_activated(window.activated_at, now) {
            return Err(TokenError::InvalidToken);
        }
        if window_expired(window.expires_at, now) {
            return Err(TokenError::Expired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Session {
        user_id: u64,
        role: String,
    }

    fn session() -> Session {
        Session {
            user_id: 42,
            role: "admin".to_string(),
        }
    }

    #[test]
    fn test_encode_decode() {
        let codec = SignedTokenCodec::new("secret");
        let claims = SignedClaims::new(session()).with_expiry(Utc::now().timestamp() + 60);

        let token = codec.encode(&claims).unwrap();
        let (body, signature) = token.split_once('.').unwrap();
        assert!(!body.contains('='));
        assert_eq!(signature.len(), 64);

        let decoded: SignedClaims<Session> = codec.decode(&token).unwrap();
        assert_eq!(decoded, claims);
        assert!(decoded.is_valid());
    }

    #[test]
    fn test_wrong_secret_is_signature_mismatch() {
        let token = SignedTokenCodec::new("secret")
            .encode(&SignedClaims::new(session()))
            .unwrap();
        let other = SignedTokenCodec::new("other");

        assert!(matches!(
            other.decode::<Session>(&token),
            Err(TokenError::SignatureMismatch)
        ));
        assert!(matches!(
            other.verify(&token, false),
            Err(TokenError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let codec = SignedTokenCodec::new("secret");
        let token = codec.encode(&SignedClaims::new(session())).unwrap();
        let (_, signature) = token.split_once('.').unwrap();

        let forged = SignedClaims::new(Session {
            user_id: 1,
            role: "admin".to_string(),
        });
        let forged_body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let forged_token = format!("{}.{}", forged_body, signature);

        assert!(matches!(
            codec.verify(&forged_token, false),
            Err(TokenError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_malformed_tokens() {
        let codec = SignedTokenCodec::new("secret");
        for token in ["", "abc", ".deadbeef", "a.b.c", "!!!.00", "eyJ9.zz"] {
            assert!(
                matches!(codec.verify(token, false), Err(TokenError::InvalidToken)),
                "token = {:?}",
                token
            );
        }
    }

    #[test]
    fn test_expiry_window() {
        let codec = SignedTokenCodec::new("secret");
        let now = Utc::now().timestamp();

        let expired = codec
            .encode(&SignedClaims::new(session()).with_expiry(now - 10))
            .unwrap();
        assert!(codec.verify(&expired, false).is_ok());
        assert!(matches!(
            codec.verify(&expired, true),
            Err(TokenError::Expired)
        ));

        let pending = codec
            .encode(
                &SignedClaims::new(session())
                    .with_activation(now + 3600)
                    .with_expiry(now + 7200),
            )
            .unwrap();
        assert!(matches!(
            codec.verify(&pending, true),
            Err(TokenError::InvalidToken)
        ));
        let claims: SignedClaims<Session> = codec.decode(&pending).unwrap();
        assert!(!claims.is_activated());
        assert!(!claims.is_valid());

        let live = codec
            .encode(&SignedClaims::new(session()).with_expiry(now + 60))
            .unwrap();
        assert!(codec.verify(&live, true).is_ok());

        // 没有到期时间的令牌只能通过不检查时间窗口的校验
        let open = codec.encode(&SignedClaims::new(session())).unwrap();
        assert!(codec.verify(&open, false).is_ok());
        assert!(matches!(
            codec.verify(&open, true),
            Err(TokenError::InvalidToken)
        ));
        let claims: SignedClaims<Session> = codec.decode(&open).unwrap();
        assert!(claims.is_valid());
    }

    #[test]
    fn test_unset_window_is_omitted() {
        let codec = SignedTokenCodec::new("secret");
        let token = codec.encode(&SignedClaims::new(session())).unwrap();
        let (body, _) = token.split_once('.').unwrap();
        let json = String::from_utf8(URL_SAFE_NO_PAD.decode(body).unwrap()).unwrap();
        assert!(!json.contains("expires_at"));
        assert!(!json.contains("activated_at"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let codec = SignedTokenCodec::new("super-secret");
        assert!(!format!("{:?}", codec).contains("super-secret"));
    }
}
