//! # cdd-rs: Clock Difference Diagrams in Rust
//!
//! **`cdd-rs`** is a manager-centric library for Clock Difference Diagrams
//! (CDDs): decision diagrams over boolean variables and clock-difference
//! constraints of the form `x_i - x_j ∈ I`. It is designed as the symbolic
//! state representation of timed-automata verification tools, where
//! non-convex unions of zones have to be stored together with discrete
//! state.
//!
//! ## What is a CDD?
//!
//! Structurally a CDD is a BDD whose inner nodes may also be labelled with a
//! clock difference instead of a boolean variable. Such a node has two *or
//! more* outgoing edges, each labelled with an interval; the intervals
//! partition the real line. Contrary to DBMs, which are limited to convex
//! zones, a CDD represents arbitrary unions of zones; contrary to ROBDDs,
//! the representation is not canonical --- but eliminating infeasible paths
//! ([`Cdd::reduce`]) yields a pseudo-canonical form in which a tautology is
//! exactly [`Cdd::TRUE`] and an unsatisfiable diagram exactly
//! [`Cdd::FALSE`].
//!
//! ## Key Features
//!
//! - **Manager-Centric Architecture**: all operations go through the
//!   [`Cdd`][crate::cdd::Cdd] session. Hash consing keeps every node unique;
//!   a mark-free sweep collector with reference counts and deferred
//!   reclamation recycles dead nodes.
//! - **Lightweight handles**: diagrams are [`Ref`][crate::reference::Ref]
//!   values whose bit 0 encodes semantic negation, so complementing a
//!   diagram is free and `--r == r` by construction.
//! - **Operation caching**: direct-mapped caches memoise `apply`,
//!   quantification, substitution and the relax step.
//! - **Canonicalisation**: incremental consistency checking with Tarjan's
//!   subtree-disassembly algorithm (and a Bellman–Ford cross-check).
//! - **DBM bridge**: conversion from and to Difference-Bound Matrices,
//!   containment tests, and the zone-level transformers (`delay`, `past`,
//!   resets, transitions, timed predecessors).
//!
//! ## Basic Usage
//!
//! ```rust
//! use cdd_rs::bounds::{bnd_lower, bnd_upper};
//! use cdd_rs::cdd::{Cdd, Op};
//!
//! // 1. Initialise the session, declare clocks and booleans.
//! let mut cdd = Cdd::default();
//! cdd.add_clocks(3);
//! let b = cdd.add_bddvar(1);
//!
//! // 2. Build constraints: 2 <= x1 - x0 <= 5, and a boolean.
//! let zone = cdd.interval(1, 0, bnd_lower(2, false), bnd_upper(5, false));
//! let ok = cdd.mk_var(b);
//!
//! // 3. Combine them.
//! let state = cdd.apply(zone, ok, Op::And);
//! assert_ne!(state, Cdd::FALSE);
//!
//! // 4. Negation is a bit flip; conjunction with it empties the state.
//! assert_eq!(cdd.apply(state, -state, Op::And), Cdd::FALSE);
//! ```
//!
//! ## Core Components
//!
//! - **[`cdd`]**: the heart of the library --- the session, node managers,
//!   hash-consing, reference counts and garbage collection.
//! - **[`apply`]**: binary operations with negation push-down.
//! - **[`reduce`]**: the canonicalisation engine.
//! - **[`quant`]**: existential quantification and substitution.
//! - **[`zone`]** / **[`transform`]**: the DBM bridge and the timed
//!   transformers built on it.
//! - **[`dot`]**: Graphviz visualisation.

pub mod apply;
pub mod bellmanford;
pub mod bitset;
pub mod bounds;
pub mod cache;
pub mod cdd;
pub mod dbm;
pub mod dot;
pub mod error;
pub mod manager;
pub mod node;
pub mod quant;
pub mod reduce;
pub mod reference;
pub mod subtable;
pub mod tarjan;
pub mod transform;
pub mod utils;
pub mod zone;

pub use crate::cdd::{Cdd, Op};
pub use crate::error::CddError;
pub use crate::reference::Ref;
pub use crate::zone::Extraction;
