//! Solidity ABI for the contracts the service talks to.
//!
//! Only the functions the orchestrators and caches call are declared.
//! Call data is produced with `SolCall::abi_encode` and return data is
//! decoded with `SolCall::abi_decode_returns`.

use alloy_sol_types::sol;

sol! {
    /// Tuple the attestation signature commits to.
    ///
    /// Field order matches the vault's `depositWithSnapshot` argument.
    struct AttestedBalance {
        uint256 assets;
        address receiver;
        uint256 nonce;
        uint256 deadline;
        uint256 balance;
    }

    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
    }

    interface IVault {
        function deposit(uint256 assets, address receiver) external returns (uint256 shares);
        function depositWithSnapshot(
            uint256 assets,
            address receiver,
            AttestedBalance snapshot,
            bytes signature
        ) external returns (uint256 shares);
        function withdraw(uint256 assets, address receiver, address owner) external returns (uint256 shares);
        function totalAssets() external view returns (uint256);
        function totalSupply() external view returns (uint256);
    }
}
