//! Bridge contract ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe bindings for the subset of
//! the bridge contract the relayer reads.

#![allow(clippy::too_many_arguments)]

use alloy::sol;

sol! {
    /// Bridge contract interface (events and transaction-record query)
    #[sol(rpc)]
    contract Bridge {
        /// Tokens locked on the source chain; carries full routing data
        event TokenLocked(
            bytes32 indexed txId,
            address indexed user,
            address indexed token,
            uint256 amount,
            uint256 targetChain,
            address targetAddress
        );

        /// Wrapped tokens burned on the source chain; routing data lives in
        /// the transaction record
        event TokenBurned(
            bytes32 indexed txId,
            address indexed user,
            address indexed token,
            uint256 amount
        );

        /// Release/mint finished on the target chain
        event BridgeCompleted(bytes32 indexed txId);

        /// Get the bridge transaction record (zero struct if unknown)
        function getTransaction(bytes32 txId) external view returns (
            bytes32 id,
            address user,
            address token,
            uint256 amount,
            uint256 fee,
            uint256 sourceChain,
            uint256 targetChain,
            address targetAddress,
            uint256 timestamp,
            uint8 status
        );
    }
}
