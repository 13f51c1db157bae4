use terra_rpc_client::RpcError;

use crate::network::NetworkClient;

/// Hands out the sequence numbers of one account for the duration of a run.
///
/// Seeded once from the chain, then advanced locally each time a transaction is built,
/// so back-to-back transactions from the same signer never collide.
#[derive(Debug)]
pub struct SequenceAllocator {
    address: String,
    account_number: u64,
    next: u64,
}

impl SequenceAllocator {
    pub fn initialize(
        network: &dyn NetworkClient,
        address: &str,
    ) -> Result<SequenceAllocator, RpcError> {
        let account = network.get_account(address)?;
        debug!(
            "account {} (number {}) starts at sequence {}",
            address, account.account_number, account.sequence
        );
        Ok(SequenceAllocator::new(
            address,
            account.account_number,
            account.sequence,
        ))
    }

    pub fn new(address: &str, account_number: u64, sequence: u64) -> SequenceAllocator {
        SequenceAllocator {
            address: address.to_string(),
            account_number,
            next: sequence,
        }
    }

    pub fn next(&mut self) -> u64 {
        let sequence = self.next;
        self.next += 1;
        sequence
    }

    /// Hands `sequence` out again when it was the last one issued and the chain never
    /// consumed it. Returns whether it was taken back.
    pub fn release(&mut self, sequence: u64) -> bool {
        if sequence + 1 != self.next {
            return false;
        }
        debug!("sequence {} of {} released", sequence, self.address);
        self.next = sequence;
        true
    }

    pub fn peek(&self) -> u64 {
        self.next
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn account_number(&self) -> u64 {
        self.account_number
    }
}
