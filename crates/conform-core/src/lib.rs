//! conform-core
//!
//! Reconciliation engine: task graphs with guards, an object lock table, a
//! job executor that splices meta-task output, and the diff-driven
//! meta-tasks that keep desired state and external systems in line.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, errors, state, model, job）
//! - **lock**: LockObjectReference / LockRegistry / 階層的な取得ヘルパー
//! - **graph**: TaskGuard / TaskGraph / DependencyGraph
//! - **task**: Task trait と組み込みタスク（unlock, failed-with-context）
//! - **engine**: JobEngine（worker pool, executor, builder）
//! - **ports**: 抽象化レイヤー（Repository, capability, Clock, IdGenerator）
//! - **impls**: 実装（インメモリ repository と fake 外部システム）
//! - **reconcile**: メタタスクと Conformer
//! - **config** / **observability**: 設定と状態ビュー

pub mod config;
pub mod domain;
pub mod engine;
pub mod graph;
pub mod impls;
pub mod lock;
pub mod observability;
pub mod ports;
pub mod reconcile;
pub mod task;
