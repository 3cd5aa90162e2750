//! # MediPACS存储模块
//!
//! 负责影像文件字节的落盘与清理。

pub mod storage;

pub use storage::*;
