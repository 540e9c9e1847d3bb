//! Signing capability
//!
//! The engine never touches key material. It asks a [`Signer`] for addresses
//! and for the unlocks of a transaction essence. [`Ed25519Signer`] is a seed
//! based implementation suitable for tests and local tooling.

use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey};
use node_api::{Address, Output, OutputId, TransactionEssence, Unlock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

const KEY_DERIVATION_CONTEXT: &str = "ledger-client 2024 ed25519 address key";

/// Signer failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// Input owned by an address the signer cannot derive
    #[error("Input {output_id} is not owned by account {account_index} index {address_index}")]
    AddressMismatch {
        /// Offending input
        output_id: OutputId,
        /// Account index claimed by the caller
        account_index: u32,
        /// Address index claimed by the caller
        address_index: u32,
    },

    /// Signing data does not line up with the essence inputs
    #[error("Signing data does not match the essence: {0}")]
    InputMismatch(String),

    /// Backend (HSM, remote signer...) failure
    #[error("Signer backend error: {0}")]
    Backend(String),
}

/// Input plus the derivation path of its owning address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSigningData {
    /// Consumed output id
    pub output_id: OutputId,
    /// Consumed output
    pub output: Output,
    /// Account of the owning address
    pub account_index: u32,
    /// Index of the owning address
    pub address_index: u32,
}

/// Key holder used for address derivation and transaction signing
#[async_trait]
pub trait Signer: Send + Sync {
    /// Address at `address_index` of `account_index`
    async fn address(&self, account_index: u32, address_index: u32) -> Result<Address, SignerError>;

    /// One unlock per input, in essence input order
    async fn sign_transaction(
        &self,
        essence: &TransactionEssence,
        inputs: &[InputSigningData],
    ) -> Result<Vec<Unlock>, SignerError>;
}

/// Ed25519 signer deriving one key per (account, index) from a seed
pub struct Ed25519Signer {
    seed: [u8; 32],
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer").finish_non_exhaustive()
    }
}

impl Ed25519Signer {
    /// Create new signer
    pub fn new(seed: [u8; 32]) -> Self {
        Self { seed }
    }

    fn signing_key(&self, account_index: u32, address_index: u32) -> SigningKey {
        let mut material = Vec::with_capacity(40);
        material.extend_from_slice(&self.seed);
        material.extend_from_slice(&account_index.to_le_bytes());
        material.extend_from_slice(&address_index.to_le_bytes());
        SigningKey::from_bytes(&blake3::derive_key(KEY_DERIVATION_CONTEXT, &material))
    }

    fn derive_address(&self, account_index: u32, address_index: u32) -> Address {
        let public_key = self.signing_key(account_index, address_index).verifying_key();
        Address::from_public_key(public_key.as_bytes())
    }
}

#[async_trait]
impl Signer for Ed25519Signer {
    async fn address(&self, account_index: u32, address_index: u32) -> Result<Address, SignerError> {
        Ok(self.derive_address(account_index, address_index))
    }

    async fn sign_transaction(
        &self,
        essence: &TransactionEssence,
        inputs: &[InputSigningData],
    ) -> Result<Vec<Unlock>, SignerError> {
        if inputs.len() != essence.inputs.len()
            || inputs
                .iter()
                .zip(&essence.inputs)
                .any(|(data, id)| data.output_id != *id)
        {
            return Err(SignerError::InputMismatch(format!(
                "{} signing entries for {} inputs",
                inputs.len(),
                essence.inputs.len()
            )));
        }

        let hash = essence.hash();
        let mut unlocks = Vec::with_capacity(inputs.len());
        // First unlock position per owning address
        let mut signed: HashMap<Address, u16> = HashMap::new();

        for (position, data) in inputs.iter().enumerate() {
            let key = self.signing_key(data.account_index, data.address_index);
            let public_key = key.verifying_key().to_bytes();
            let address = Address::from_public_key(&public_key);

            if data.output.address() != Some(&address) {
                return Err(SignerError::AddressMismatch {
                    output_id: data.output_id,
                    account_index: data.account_index,
                    address_index: data.address_index,
                });
            }

            match signed.get(&address) {
                Some(first) => unlocks.push(Unlock::Reference(*first)),
                None => {
                    signed.insert(address, position as u16);
                    unlocks.push(Unlock::Signature {
                        public_key,
                        signature: key.sign(&hash).to_bytes().to_vec(),
                    });
                }
            }
        }

        Ok(unlocks)
    }
}
