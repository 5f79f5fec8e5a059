use flex_error::define_error;

use ibc_relayer_path_types::ChainId;

use crate::chain::ProviderError;

define_error! {
    PathError {
        ChainProviderNotSet
            { chain_id: ChainId }
            |e| { format_args!("no chain provider set for chain {}", e.chain_id) },

        Send
            { chain_id: ChainId }
            [ ProviderError ]
            |e| { format_args!("failed to send messages to chain {}", e.chain_id) },

        InitialMessage
            { chain_id: ChainId }
            [ ProviderError ]
            |e| {
                format_args!("failed to submit initial lifecycle message to chain {}", e.chain_id)
            },
    }
}
