//! Truvis 工具集
//!
//! 在各个 crate 之间共享的日志初始化。
//!
//! 日志格式：带颜色的级别、时间戳、线程名，以及输出位置的模块与文件行号。

pub mod init_log;
