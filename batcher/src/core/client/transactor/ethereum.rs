use std::collections::BTreeMap;
use std::sync::Arc;

use alloy::consensus::TxEip1559;
use alloy::primitives::{Address, Bytes, TxKind, U256};
use alloy::sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use batcher_chain_client_interface::EthClient;
use tracing::debug;

use super::{Transactor, TransactorError};
use crate::types::attestation::{QuorumResult, SignatureAggregation};
use crate::types::encoding::G1Point;
use crate::types::header::BatchHeader;
use crate::types::QuorumId;

mod abi {
    alloy::sol! {
        struct G1Point {
            uint256 X;
            uint256 Y;
        }

        struct BatchHeader {
            bytes32 blobHeadersRoot;
            bytes quorumNumbers;
            bytes signedStakeForQuorums;
            uint32 referenceBlockNumber;
        }

        struct NonSignerStakesAndSignature {
            G1Point[] nonSignerPubkeys;
            G1Point[] quorumApks;
            bytes sigma;
        }

        function confirmBatch(BatchHeader batchHeader, bytes nonSignerStakesAndSignature);
    }
}

fn to_abi_point(point: &G1Point) -> abi::G1Point {
    abi::G1Point { X: point.x, Y: point.y }
}

/// Encodes `confirmBatch` calls against the service manager contract.
pub struct EthereumTransactor {
    eth_client: Arc<dyn EthClient>,
    service_manager: Address,
}

impl EthereumTransactor {
    pub fn new(eth_client: Arc<dyn EthClient>, service_manager: Address) -> Self {
        Self { eth_client, service_manager }
    }

    /// Calldata of `confirmBatch` for the given header and aggregation.
    pub fn confirm_batch_calldata(
        batch_header: &BatchHeader,
        quorum_results: &BTreeMap<QuorumId, QuorumResult>,
        aggregation: &SignatureAggregation,
    ) -> Bytes {
        // Quorums go on chain in ascending order with their signed percentage alongside.
        let quorum_numbers: Vec<u8> = quorum_results.keys().copied().collect();
        let signed_stake: Vec<u8> = quorum_results.values().map(|result| result.percent_signed).collect();

        let header = abi::BatchHeader {
            blobHeadersRoot: batch_header.batch_root,
            quorumNumbers: Bytes::from(quorum_numbers),
            signedStakeForQuorums: Bytes::from(signed_stake),
            referenceBlockNumber: batch_header.reference_block_number as u32,
        };
        let signature = abi::NonSignerStakesAndSignature {
            nonSignerPubkeys: aggregation.non_signers.iter().map(to_abi_point).collect(),
            quorumApks: aggregation.quorum_agg_pubkeys.values().map(to_abi_point).collect(),
            sigma: aggregation.agg_signature.0.clone(),
        };
        let call = abi::confirmBatchCall { batchHeader: header, nonSignerStakesAndSignature: signature.abi_encode().into() };
        Bytes::from(call.abi_encode())
    }
}

#[async_trait]
impl Transactor for EthereumTransactor {
    async fn build_confirm_batch_txn(
        &self,
        batch_header: &BatchHeader,
        quorum_results: &BTreeMap<QuorumId, QuorumResult>,
        aggregation: &SignatureAggregation,
    ) -> Result<TxEip1559, TransactorError> {
        let input = Self::confirm_batch_calldata(batch_header, quorum_results, aggregation);
        let nonce = self.eth_client.pending_nonce().await?;
        let chain_id = self.eth_client.chain_id().await?;
        debug!(
            component = "Transactor",
            nonce,
            chain_id,
            reference_block_number = batch_header.reference_block_number,
            "Built confirmBatch transaction"
        );

        Ok(TxEip1559 {
            chain_id,
            nonce,
            to: TxKind::Call(self.service_manager),
            value: U256::ZERO,
            input,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::B256;
    use batcher_chain_client_interface::MockEthClient;
    use rstest::rstest;

    use super::*;
    use crate::types::attestation::Signature;

    #[rstest]
    #[tokio::test]
    async fn confirm_batch_txn_targets_service_manager() {
        let mut eth_client = MockEthClient::new();
        eth_client.expect_pending_nonce().times(1).returning(|| Ok(7));
        eth_client.expect_chain_id().times(1).returning(|| Ok(17000));

        let service_manager = Address::repeat_byte(0x42);
        let transactor = EthereumTransactor::new(Arc::new(eth_client), service_manager);
        let header = BatchHeader { reference_block_number: 100, batch_root: B256::repeat_byte(1) };
        let results = BTreeMap::from([
            (0, QuorumResult { quorum_id: 0, percent_signed: 100 }),
            (1, QuorumResult { quorum_id: 1, percent_signed: 90 }),
        ]);
        let aggregation = SignatureAggregation {
            agg_signature: Signature(Bytes::from(vec![1, 2, 3])),
            ..Default::default()
        };

        let tx = transactor.build_confirm_batch_txn(&header, &results, &aggregation).await.unwrap();
        assert_eq!(tx.nonce, 7);
        assert_eq!(tx.chain_id, 17000);
        assert_eq!(tx.to, TxKind::Call(service_manager));
        assert_eq!(&tx.input[..4], abi::confirmBatchCall::SELECTOR.as_slice());

        let decoded = abi::confirmBatchCall::abi_decode(&tx.input, true).unwrap();
        assert_eq!(decoded.batchHeader.quorumNumbers, Bytes::from(vec![0, 1]));
        assert_eq!(decoded.batchHeader.signedStakeForQuorums, Bytes::from(vec![100, 90]));
        assert_eq!(decoded.batchHeader.referenceBlockNumber, 100);
    }
}
