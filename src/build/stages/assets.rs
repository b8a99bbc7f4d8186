use crate::build::changeset::ChangeSet;
use crate::build::report::{FileStatus, StageResult};
use crate::build::stages::{self, Stage};
use crate::config::{AssetsConfig, Layout};
use crate::error::StageError;
use image::ImageFormat;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const STAGE_NAME: &str = "asset";

const IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// 图片优化器：返回写入输出的字节
pub trait ImageOptimizer: Send + Sync {
    fn optimize(&self, source: &Path, data: Vec<u8>) -> Result<Vec<u8>, StageError>;
}

/// 基于 image crate 的默认优化器
pub struct ImageCrateOptimizer {
    enabled: bool,
    jpeg_quality: u8,
}

impl ImageCrateOptimizer {
    pub fn new(enabled: bool, jpeg_quality: u8) -> Self {
        Self {
            enabled,
            jpeg_quality,
        }
    }

    pub fn from_config(config: &AssetsConfig) -> Self {
        Self::new(config.optimize_images, config.jpeg_quality)
    }

    fn encode_jpeg(&self, img: &image::DynamicImage) -> image::ImageResult<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut buf, self.jpeg_quality);
        // JPEG 不支持透明通道
        image::DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?;
        Ok(buf.into_inner())
    }

    fn encode_png(img: &image::DynamicImage) -> image::ImageResult<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        let encoder =
            PngEncoder::new_with_quality(&mut buf, CompressionType::Best, FilterType::Adaptive);
        img.write_with_encoder(encoder)?;
        Ok(buf.into_inner())
    }
}

impl ImageOptimizer for ImageCrateOptimizer {
    fn optimize(&self, source: &Path, data: Vec<u8>) -> Result<Vec<u8>, StageError> {
        if !self.enabled {
            return Ok(data);
        }
        let format = image::guess_format(&data)
            .map_err(|e| StageError::Image(format!("{}：{e}", source.display())))?;
        // GIF/WebP 原样复制
        if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
            return Ok(data);
        }

        let img = image::load_from_memory_with_format(&data, format)
            .map_err(|e| StageError::Image(format!("无法解码 {}：{e}", source.display())))?;

        let encoded = match format {
            ImageFormat::Jpeg => self.encode_jpeg(&img),
            _ => Self::encode_png(&img),
        }
        .map_err(|e| StageError::Image(format!("编码 {} 失败：{e}", source.display())))?;

        // 重新编码没有变小时保留原图
        if encoded.len() < data.len() {
            Ok(encoded)
        } else {
            Ok(data)
        }
    }
}

pub struct AssetStage {
    layout: Arc<Layout>,
    optimizer: Box<dyn ImageOptimizer>,
}

impl AssetStage {
    pub fn new(layout: Arc<Layout>, optimizer: Box<dyn ImageOptimizer>) -> Self {
        Self { layout, optimizer }
    }

    fn output_for(&self, source: &Path) -> Option<PathBuf> {
        stages::output_path(&self.layout.assets_root, &self.layout.assets_out(), source, None)
    }

    fn process(&self, source: &Path, result: &mut StageResult) {
        let Some(output) = self.output_for(source) else {
            return;
        };
        if stages::is_fresh(stages::modified(source), &output) {
            result.record(source.to_path_buf(), Some(output), FileStatus::Skipped);
            return;
        }

        let bytes = std::fs::read(source).map_err(|e| StageError::io(source, e));
        let bytes = match bytes {
            Ok(data) if stages::has_ext(source, IMAGE_EXTS) => self.optimizer.optimize(source, data),
            other => other,
        };

        let status = match bytes {
            Ok(bytes) => match stages::write_if_changed(&output, &bytes) {
                Ok(status) => {
                    if status == FileStatus::Written {
                        tracing::debug!("已复制资源 {}", source.display());
                    }
                    status
                }
                Err(e) => FileStatus::Failed(StageError::io(&output, e).to_string()),
            },
            Err(e) => FileStatus::Failed(e.to_string()),
        };
        result.record(source.to_path_buf(), Some(output), status);
    }
}

impl Stage for AssetStage {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn run(&self, changes: &ChangeSet) -> StageResult {
        let mut result = StageResult::new(STAGE_NAME);
        let root = &self.layout.assets_root;

        let sources = match changes {
            ChangeSet::Full => stages::walk_files(root, &|_| true),
            ChangeSet::Partial(_) => {
                let mut sources = Vec::new();
                for path in changes.paths_under(root, |_| true) {
                    if path.is_file() {
                        sources.push(path.clone());
                    } else if !path.exists()
                        && let Some(output) = self.output_for(path)
                    {
                        stages::remove_output(&mut result, path, output);
                    }
                }
                sources
            }
        };

        for source in &sources {
            self.process(source, &mut result);
        }
        result.finish()
    }
}
