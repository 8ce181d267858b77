//! `gbn-transfer` — reliable file transfer over UDP using Go-Back-N ARQ.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────────────────┐   DATA    ┌──────────────────────────┐
//!  │ Sender                   │──────────▶│ Receiver                 │
//!  │  produce ─▶ SendWindow   │           │  assemble ─▶ mpsc        │
//!  │  control ◀─ ACK / timer  │◀──────────│  deliver  ─▶ local file  │
//!  └────┬─────────────────────┘    ACK    └─────┬────────────────────┘
//!       │                                       │
//!  ┌────▼───────────────────────────────────────▼────┐
//!  │ Socket  (tokio UdpSocket + LossModel + counters) │
//!  └──────────────────────────────────────────────────┘
//! ```
//!
//! A session is one file: the receiver sends a REQUEST naming the file and
//! the block size, the sender replies with the file size (or an error
//! status), DATA/ACK flows until every block is acknowledged, and a FIN /
//! FIN-ACK exchange closes it.
//!
//! Each module has a single responsibility:
//! - [`packet`]        — wire format (serialise / deserialise)
//! - [`socket`]        — async UDP socket abstraction
//! - [`simulator`]     — loss models for fault injection
//! - [`connection`]    — REQUEST / REPLY handshake and the error type
//! - [`state`]         — duplicate-ACK state
//! - [`gbn_sender`]    — GBN outbound ACK state machine
//! - [`window`]        — the sender's shared transmit window
//! - [`gbn_receiver`]  — GBN inbound in-order assembler
//! - [`sender`]        — sender session (producer + control path)
//! - [`receiver`]      — receiver session (assembler + deliverer)
//! - [`config`]        — per-peer settings and defaults

pub mod config;
pub mod connection;
pub mod gbn_receiver;
pub mod gbn_sender;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod window;
