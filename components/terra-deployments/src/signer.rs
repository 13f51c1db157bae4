use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

use crate::types::{SignedTransaction, UnsignedTransaction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    Io(String),
    Command { command: String, stderr: String },
    Encoding(String),
}

impl std::fmt::Display for SignerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignerError::Io(e) => write!(f, "signer io error: {}", e),
            SignerError::Command { command, stderr } => {
                write!(f, "`{}` failed: {}", command, stderr.trim())
            }
            SignerError::Encoding(e) => write!(f, "unable to decode signed transaction: {}", e),
        }
    }
}

pub trait Signer: Send + Sync {
    fn address(&self) -> &str;

    fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, SignerError>;
}

/// A signer and the on-chain account number it signs for.
#[derive(Clone, Copy)]
pub struct SignerContext<'a> {
    pub signer: &'a dyn Signer,
    pub account_number: u64,
}

impl<'a> SignerContext<'a> {
    pub fn address(&self) -> &str {
        self.signer.address()
    }
}

/// Signs with a key held in a `terrad` keyring. Key material never enters this process.
#[derive(Debug, Clone)]
pub struct TerradSigner {
    pub binary: PathBuf,
    pub key_name: String,
    pub keyring_backend: String,
    pub home: Option<PathBuf>,
    address: String,
}

impl TerradSigner {
    pub fn new(
        binary: PathBuf,
        key_name: &str,
        keyring_backend: &str,
        home: Option<PathBuf>,
        address: Option<String>,
    ) -> Result<TerradSigner, SignerError> {
        let mut signer = TerradSigner {
            binary,
            key_name: key_name.to_string(),
            keyring_backend: keyring_backend.to_string(),
            home,
            address: address.unwrap_or_default(),
        };
        if signer.address.is_empty() {
            let key_name = signer.key_name.clone();
            let keyring_backend = signer.keyring_backend.clone();
            let output = signer.run(&[
                "keys",
                "show",
                &key_name,
                "-a",
                "--keyring-backend",
                &keyring_backend,
            ])?;
            signer.address = output.trim().to_string();
        }
        Ok(signer)
    }

    fn run(&self, args: &[&str]) -> Result<String, SignerError> {
        let mut command = Command::new(&self.binary);
        command.args(args);
        if let Some(ref home) = self.home {
            command.arg("--home").arg(home);
        }
        let output = command
            .output()
            .map_err(|e| SignerError::Io(format!("unable to run {}: {}", self.binary.display(), e)))?;
        if !output.status.success() {
            return Err(SignerError::Command {
                command: format!("{} {}", self.binary.display(), args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        String::from_utf8(output.stdout).map_err(|e| SignerError::Encoding(e.to_string()))
    }
}

fn write_temp_document(content: &[u8]) -> Result<tempfile::NamedTempFile, SignerError> {
    let mut file = tempfile::NamedTempFile::new().map_err(|e| SignerError::Io(e.to_string()))?;
    file.write_all(content)
        .and_then(|_| file.flush())
        .map_err(|e| SignerError::Io(e.to_string()))?;
    Ok(file)
}

impl Signer for TerradSigner {
    fn address(&self) -> &str {
        &self.address
    }

    fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, SignerError> {
        let unsigned = serde_json::to_vec(&tx.to_proto_json())
            .map_err(|e| SignerError::Encoding(e.to_string()))?;
        let unsigned_file = write_temp_document(&unsigned)?;
        let unsigned_path = unsigned_file.path().to_string_lossy().to_string();

        let account_number = tx.account_number.to_string();
        let sequence = tx.sequence.to_string();
        let signed = self.run(&[
            "tx",
            "sign",
            &unsigned_path,
            "--from",
            &self.key_name,
            "--chain-id",
            &tx.chain_id,
            "--account-number",
            &account_number,
            "--sequence",
            &sequence,
            "--offline",
            "--keyring-backend",
            &self.keyring_backend,
            "--output",
            "json",
        ])?;

        let signed_file = write_temp_document(signed.as_bytes())?;
        let signed_path = signed_file.path().to_string_lossy().to_string();
        let encoded = self.run(&["tx", "encode", &signed_path])?;

        let tx_bytes =
            base64::decode(encoded.trim()).map_err(|e| SignerError::Encoding(e.to_string()))?;
        Ok(SignedTransaction { tx_bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_reports_a_missing_binary() {
        let error = TerradSigner::new(
            PathBuf::from("/nonexistent/terrad"),
            "test1",
            "test",
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(error, SignerError::Io(_)));
    }

    #[test]
    fn it_skips_key_lookup_when_address_is_configured() {
        let signer = TerradSigner::new(
            PathBuf::from("/nonexistent/terrad"),
            "test1",
            "test",
            None,
            Some("terra1dcegyrekltswvyy0xy69ydgxn9x8x32zdtapd8".into()),
        )
        .unwrap();
        assert_eq!(signer.address(), "terra1dcegyrekltswvyy0xy69ydgxn9x8x32zdtapd8");
    }
}
