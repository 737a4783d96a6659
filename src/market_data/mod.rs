// Market data module entrypoint
pub mod adapters;   // per-exchange vocabulary + frame decoding (OKX, Binance)
pub mod dispatcher; // callback table + dispatcher seam
pub mod events;     // canonical model every adapter produces
pub mod feed;       // per-session callbacks + subscribe API
pub mod handoff;    // bounded queue for slow consumers
pub mod normaliser; // wire strings -> numbers / level diffs
pub mod registry;   // instrument id -> order book
pub mod router;     // wires settings -> feed for the binary
pub mod session;    // transport seam + websocket session
