use std::sync::Arc;

use crate::error::{Error, Result};
use crate::process::{ProcessRunner, command_line};

/// Length of a base64-encoded curve25519 key as printed by `wg genkey`.
pub const KEY_LEN: usize = 44;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private: String,
    pub public: String,
}

/// Shells out to `<mode> genkey` and `<mode> pubkey`.
#[derive(Clone)]
pub struct KeyPairGenerator {
    runner: Arc<dyn ProcessRunner>,
    mode: String,
}

impl KeyPairGenerator {
    pub fn new(runner: Arc<dyn ProcessRunner>, mode: impl Into<String>) -> Self {
        Self {
            runner,
            mode: mode.into(),
        }
    }

    pub async fn generate(&self) -> Result<KeyPair> {
        let private = self.invoke(&["genkey"], None).await?;
        if private.is_empty() {
            return Err(Error::KeyGeneration(format!(
                "empty private key from {} genkey",
                self.mode
            )));
        }

        let public = self.invoke(&["pubkey"], Some(&private)).await?;
        if public.is_empty() {
            return Err(Error::KeyGeneration(format!(
                "empty public key from {} pubkey",
                self.mode
            )));
        }

        Ok(KeyPair { private, public })
    }

    async fn invoke(&self, args: &[&str], stdin: Option<&str>) -> Result<String> {
        let output = self
            .runner
            .run(&self.mode, args, stdin)
            .await
            .map_err(|err| err.into_error(Error::KeyGeneration))?;
        if !output.success {
            return Err(Error::KeyGeneration(format!(
                "{} failed with {}: {}",
                command_line(&self.mode, args),
                output.describe_exit(),
                output.stderr.trim()
            )));
        }
        Ok(output.stdout.trim().to_string())
    }
}

/// Rough shape check for stored key material.
pub fn looks_like_key(key: &str) -> bool {
    key.trim().len() == KEY_LEN
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Output;
    use crate::process::testing::{FakeRunner, Reply};

    #[tokio::test]
    async fn pipes_private_key_into_pubkey() {
        let runner = Arc::new(FakeRunner::with_key_tool("awg"));
        let keys = KeyPairGenerator::new(runner.clone(), "awg");

        let pair = keys.generate().await.unwrap();
        assert!(looks_like_key(&pair.private));
        assert!(looks_like_key(&pair.public));
        assert_ne!(pair.private, pair.public);

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].command_line(), "awg genkey");
        assert_eq!(calls[1].command_line(), "awg pubkey");
        assert_eq!(calls[1].stdin.as_deref(), Some(pair.private.as_str()));
    }

    #[tokio::test]
    async fn each_call_yields_a_fresh_pair() {
        let runner = Arc::new(FakeRunner::with_key_tool("wg"));
        let keys = KeyPairGenerator::new(runner, "wg");
        let first = keys.generate().await.unwrap();
        let second = keys.generate().await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn empty_genkey_output_is_rejected() {
        let runner = Arc::new(FakeRunner::new());
        runner.on("wg genkey", Reply::Output(Output::ok("\n")));
        let keys = KeyPairGenerator::new(runner.clone(), "wg");

        let err = keys.generate().await.unwrap_err();
        assert!(matches!(err, Error::KeyGeneration(_)));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn empty_pubkey_output_is_rejected() {
        let runner = Arc::new(FakeRunner::new());
        runner
            .on("wg genkey", Reply::FreshKey)
            .on("wg pubkey", Reply::Output(Output::ok("")));
        let keys = KeyPairGenerator::new(runner, "wg");
        assert!(matches!(
            keys.generate().await,
            Err(Error::KeyGeneration(_))
        ));
    }

    #[tokio::test]
    async fn missing_tool_and_failures_map_to_key_generation() {
        let runner = Arc::new(FakeRunner::new());
        let keys = KeyPairGenerator::new(runner, "wg");
        assert!(matches!(
            keys.generate().await,
            Err(Error::KeyGeneration(_))
        ));

        let runner = Arc::new(FakeRunner::new());
        runner.on("wg genkey", Reply::Output(Output::failed(1, "boom")));
        let keys = KeyPairGenerator::new(runner, "wg");
        let err = keys.generate().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn hung_tool_surfaces_as_timeout() {
        let runner = Arc::new(FakeRunner::new());
        runner.on("wg genkey", Reply::Timeout);
        let keys = KeyPairGenerator::new(runner, "wg");
        assert!(matches!(keys.generate().await, Err(Error::Timeout { .. })));
    }
}
