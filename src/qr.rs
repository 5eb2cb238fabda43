use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::OffsetDateTime;

type HmacSha256 = Hmac<Sha256>;

/// Builds the animated QR payload for a pending order at the current time.
///
/// `bankid.<qrStartToken>.<seconds since order>.<hex HMAC-SHA256>`
#[must_use]
pub fn generate(qr_start_token: &str, qr_start_secret: &str, order_time: OffsetDateTime) -> String {
    generate_at(
        qr_start_token,
        qr_start_secret,
        order_time,
        OffsetDateTime::now_utc(),
    )
}

/// Builds the QR payload as seen at `now`. Clock skew never yields a negative
/// offset.
#[must_use]
pub fn generate_at(
    qr_start_token: &str,
    qr_start_secret: &str,
    order_time: OffsetDateTime,
    now: OffsetDateTime,
) -> String {
    let elapsed = (now - order_time).whole_seconds().max(0);
    let auth_code = auth_code(qr_start_secret, elapsed);
    format!("bankid.{qr_start_token}.{elapsed}.{auth_code}")
}

/// `HEX(HMAC-SHA256(key = qrStartSecret, message = decimal seconds))`
#[must_use]
pub fn auth_code(qr_start_secret: &str, elapsed_secs: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(qr_start_secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(elapsed_secs.to_string().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
