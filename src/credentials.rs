//! OS keyring storage for the Plex token.
//!
//! Tokens are stored per server under the service `tunesync.plex`. The
//! account is the server URL with surrounding whitespace and trailing `/`
//! removed, so `http://nas:32400/` and `http://nas:32400` share one entry.

use keyring::Entry;

const PLEX_SERVICE_NAME: &str = "tunesync.plex";

#[derive(Debug, Clone, Copy)]
enum KeyringAction {
    Save,
    Load,
}

impl KeyringAction {
    fn describe(self) -> &'static str {
        match self {
            KeyringAction::Save => "save Plex token",
            KeyringAction::Load => "load Plex token",
        }
    }
}

/// Keyring handle for one Plex server's token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlexTokenStore {
    account: String,
}

impl PlexTokenStore {
    pub fn for_server(server_url: &str) -> Self {
        Self {
            account: server_url.trim().trim_end_matches('/').to_string(),
        }
    }

    fn entry(&self) -> Result<Entry, String> {
        Entry::new(PLEX_SERVICE_NAME, &self.account).map_err(|err| {
            format!(
                "failed to create keyring entry for Plex server '{}': {err}",
                self.account
            )
        })
    }

    fn keyring_error(&self, action: KeyringAction, err: keyring::Error) -> String {
        let detail = err.to_string();
        let base = format!(
            "{} failed in system keyring for Plex server '{}': {detail}",
            action.describe(),
            self.account
        );
        if detail.contains("org.freedesktop.DBus.Error.ServiceUnknown") {
            return format!(
                "{base}. Hint: no Secret Service provider is running. Start GNOME Keyring or KeePassXC, or skip `tunesync set-token` and export PLEX_TOKEN instead."
            );
        }
        base
    }

    pub fn save(&self, token: &str) -> Result<(), String> {
        let token = token.trim();
        if token.is_empty() {
            return Err("Plex token cannot be empty".to_string());
        }
        self.entry()?
            .set_password(token)
            .map_err(|err| self.keyring_error(KeyringAction::Save, err))
    }

    pub fn load(&self) -> Result<Option<String>, String> {
        match self.entry()?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(self.keyring_error(KeyringAction::Load, err)),
        }
    }
}

/// Token from config or environment first, then the keyring entry for `server_url`.
pub fn resolve_plex_token(
    configured: Option<&str>,
    server_url: &str,
) -> Result<Option<String>, String> {
    if let Some(token) = configured {
        return Ok(Some(token.to_string()));
    }
    PlexTokenStore::for_server(server_url).load()
}
