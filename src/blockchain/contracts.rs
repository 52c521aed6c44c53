// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token contract bindings (ERC-20, ERC-721, ERC-1155).
//!
//! Only the read calls and transfer events the access engine needs.

use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        event Transfer(address indexed from, address indexed to, uint256 value);

        function balanceOf(address account) external view returns (uint256);
    }

    #[sol(rpc)]
    interface IERC721 {
        event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);

        function ownerOf(uint256 tokenId) external view returns (address);
    }

    #[sol(rpc)]
    interface IERC1155 {
        event TransferSingle(
            address indexed operator,
            address indexed from,
            address indexed to,
            uint256 id,
            uint256 value
        );

        event TransferBatch(
            address indexed operator,
            address indexed from,
            address indexed to,
            uint256[] ids,
            uint256[] values
        );

        function balanceOf(address account, uint256 id) external view returns (uint256);
    }
}
