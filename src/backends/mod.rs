// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for depth capture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        Ranging session / renderers          │
//! └────────────────────┬────────────────────────┘
//!                      │  DepthFrame
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                  │
//! │  ┌──────────────┐    ┌──────────────────┐   │
//! │  │  Synthetic   │    │     Channel      │   │
//! │  │   scene      │    │ (external feed)  │   │
//! │  └──────────────┘    └──────────────────┘   │
//! └─────────────────────────────────────────────┘
//! ```

pub mod depth;
