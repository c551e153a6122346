//! 视频片段 → GIF 的核心流水线
//!
//! capture → quantize → encode → storage，progress 贯穿所有阶段，
//! pipeline 负责编排与取消。

pub mod capture;
pub mod encode;
pub mod pipeline;
pub mod progress;
pub mod quantize;
pub mod storage;
