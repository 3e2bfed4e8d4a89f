use alloy::sol;

sol! {
    /// The subset of ERC-20 used by the flow.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IERC20 {
        event Transfer(address indexed from, address indexed to, uint256 value);

        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);
        function approve(address spender, uint256 amount) external returns (bool);
        function transfer(address to, uint256 amount) external returns (bool);
    }

    /// The lending pool's deposit entrypoint.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface ILendingPool {
        function supply(address asset, uint256 amount, address onBehalfOf, uint16 referralCode) external;
    }
}
