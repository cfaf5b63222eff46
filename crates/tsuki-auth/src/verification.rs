//! Email verification: `Unverified -> Pending -> Verified`.
//!
//! A request mints a fresh verification token, stores it behind a random
//! opaque id and builds the mail pointing at `{base}/auth/verify/{id}`.
//! Redemption resolves id -> token -> claims and sets the verified flag.
//! Records are kept after redemption and older ones stay valid until their
//! own expiry, so redeeming the same link twice succeeds twice.

use tracing::{info, warn};
use uuid::Uuid;

use tsuki_types::models::UserUpdate;
use tsuki_types::store::Store;

use crate::error::{AuthError, Result};
use crate::token::{TokenProfile, TokenService, VERIFICATION_TTL_HOURS};

pub const VERIFICATION_SUBJECT: &str = "Verify your Tsuki account";

/// A built message, ready for a [`Notifier`](crate::notify::Notifier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailPayload {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub link: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redemption {
    /// The flag flipped just now.
    Verified,
    /// Nothing to do; the account was verified before.
    AlreadyVerified,
}

pub struct VerificationFlow<'a, S: ?Sized> {
    store: &'a S,
    tokens: &'a TokenService,
    base_url: &'a str,
}

impl<'a, S: Store + ?Sized> VerificationFlow<'a, S> {
    pub fn new(store: &'a S, tokens: &'a TokenService, base_url: &'a str) -> Self {
        Self {
            store,
            tokens,
            base_url,
        }
    }

    /// Returns the opaque id and the mail to send. Previous ids for the same
    /// user are left alone.
    pub fn request(&self, user_id: Uuid) -> Result<(String, MailPayload)> {
        let user = self
            .store
            .find_user_by_id(user_id)?
            .ok_or_else(|| AuthError::not_found("user"))?;
        let email = user
            .email
            .clone()
            .ok_or_else(|| AuthError::Validation("account has no email address".into()))?;

        let token = self.tokens.issue_for(TokenProfile::Verification, user.id)?;
        let opaque_id = Uuid::new_v4().simple().to_string();
        self.store.save_verification_record(&opaque_id, &token)?;

        let link = verification_link(self.base_url, &opaque_id);
        info!("Verification {} issued for user {}", opaque_id, user.id);

        let mail = MailPayload {
            html_body: render_mail(&user.username, &email, &link),
            to: email,
            subject: VERIFICATION_SUBJECT.to_string(),
            link,
        };
        Ok((opaque_id, mail))
    }

    pub fn redeem(&self, opaque_id: &str) -> Result<Redemption> {
        let token = self
            .store
            .find_verification_record(opaque_id)?
            .ok_or_else(|| AuthError::not_found("verification record"))?;

        let claims = self.tokens.parse(&token).inspect_err(|_| {
            warn!("Verification {} holds an invalid or expired token", opaque_id);
        })?;

        let user = self
            .store
            .find_user_by_id(claims.user_id)?
            .ok_or_else(|| AuthError::not_found("user"))?;
        if user.verified {
            return Ok(Redemption::AlreadyVerified);
        }

        if !self.store.update_user(user.id, &UserUpdate::SetVerified(true))? {
            // Deleted between the read and the write.
            return Err(AuthError::not_found("user"));
        }
        info!("User {} verified via {}", user.id, opaque_id);
        Ok(Redemption::Verified)
    }
}

pub fn verification_link(base_url: &str, opaque_id: &str) -> String {
    format!("{}/auth/verify/{}", base_url.trim_end_matches('/'), opaque_id)
}

fn render_mail(username: &str, email: &str, link: &str) -> String {
    format!(
        r#"<html>
<head></head>
<body style="font-family: 'Courier New', Courier, monospace; padding-left: 15px; padding-top: 10px;">
    <h1>Tsuki</h1>
    <h2>Account Verification</h2>
    <p>
    Hi {username}, please confirm that {email} is your e-mail address by opening
    <a href="{link}">{link}</a> within {hours} hours.
    </p>
</body>
</html>"#,
        username = escape_html(username),
        email = escape_html(email),
        link = escape_html(link),
        hours = VERIFICATION_TTL_HOURS,
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
