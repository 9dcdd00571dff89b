use anyhow::{Context, Result};
use coinlib::{
    chain::PeerFanout,
    crypto::{PrivateKey, PublicKey},
    types::Transaction,
    util::Saveable,
};
use tracing::{debug, info};

pub fn init_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init();
}

/// Loads `<name>.priv.cbor` as written by `key_gen`, or makes a throwaway
/// key when no name is given.
pub fn load_key(name: Option<&str>) -> Result<(PrivateKey, PublicKey)> {
    let private_key = match name {
        Some(name) => {
            let path = format!("{name}.priv.cbor");
            let key = PrivateKey::load_from_file(&path)
                .with_context(|| format!("loading private key from {path}"))?;
            info!(path, "loaded key");
            key
        }
        None => {
            info!("no key given, generating one");
            PrivateKey::new_key()
        }
    };
    let public_key = private_key.public_key();
    Ok((private_key, public_key))
}

/// Stands in for the peer layer: reports what would be gossiped.
#[derive(Debug, Default)]
pub struct LogFanout {
    pub announced: usize,
    pub retracted: usize,
}

impl PeerFanout for LogFanout {
    fn notify_new_pending(&mut self, tx: &Transaction) {
        self.announced += 1;
        debug!(tx = ?tx.hash().ok(), "announcing pending transaction");
    }

    fn notify_retracted(&mut self, tx: &Transaction) {
        self.retracted += 1;
        info!(tx = ?tx.hash().ok(), "retracting invalid transaction");
    }
}
