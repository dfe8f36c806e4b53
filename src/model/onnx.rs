// 该文件是 Jiedao （街道巡检） 项目的一部分。
// src/model/onnx.rs - ONNX 分类模型
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::PathBuf;

use tracing::{debug, error, info};
use tract_onnx::prelude::*;

use crate::{
  IMAGE_SIZE,
  model::{Model, ModelError},
  tensor::RgbNhwcTensor,
};

/// 基于 tract 的 NHWC 输入分类模型
///
/// tract 的执行计划只读，`infer` 可以在多个线程上并发调用。
pub struct OnnxClassifier<const W: u32 = IMAGE_SIZE, const H: u32 = IMAGE_SIZE> {
  plan: TypedRunnableModel<TypedModel>,
}

pub struct OnnxClassifierBuilder {
  model_path: PathBuf,
  num_classes: Option<usize>,
}

impl OnnxClassifierBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      num_classes: None,
    }
  }

  /// 加载时校验输出长度
  pub fn expect_classes(mut self, num_classes: usize) -> Self {
    self.num_classes = Some(num_classes);
    self
  }

  pub fn build<const W: u32, const H: u32>(self) -> Result<OnnxClassifier<W, H>, ModelError> {
    info!("加载模型文件: {}", self.model_path.display());
    let size = std::fs::metadata(&self.model_path)?.len();
    debug!("模型文件大小: {:.2} MB", size as f64 / (1024.0 * 1024.0));

    let input_shape = RgbNhwcTensor::<W, H>::SHAPE;
    let model = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .map_err(|e| ModelError::runtime("无法解析 ONNX 模型", e))?
      .with_input_fact(0, f32::fact(input_shape).into())
      .map_err(|e| ModelError::runtime("无法设置输入形状", e))?;

    let model = model
      .into_optimized()
      .map_err(|e| ModelError::runtime("模型优化失败", e))?;

    let num_outputs = model.output_outlets().map(|o| o.len()).unwrap_or(0);
    debug!("模型输出数量: {}", num_outputs);

    if let Some(expected) = self.num_classes
      && let Ok(fact) = model.output_fact(0)
      && let Some(shape) = fact.shape.as_concrete()
    {
      let actual = shape.iter().product::<usize>();
      if actual != expected {
        error!("预期模型输出长度为 {}, 实际为 {}", expected, actual);
        return Err(ModelError::OutputMismatch { expected, actual });
      }
    }

    let plan = model
      .into_runnable()
      .map_err(|e| ModelError::runtime("无法创建执行计划", e))?;
    info!("模型加载完成，输入形状 {:?}", input_shape);

    Ok(OnnxClassifier { plan })
  }
}

impl<const W: u32, const H: u32> Model for OnnxClassifier<W, H> {
  type Input = RgbNhwcTensor<W, H>;
  type Output = Vec<f32>;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("设置模型输入");
    let tensor = Tensor::from_shape(&input.shape(), input.as_slice())
      .map_err(|e| ModelError::runtime("输入张量形状错误", e))?;

    debug!("执行模型推理");
    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(|e| ModelError::runtime("推理失败", e))?;

    let output = outputs
      .first()
      .ok_or_else(|| ModelError::Runtime("模型没有输出".to_string()))?;
    let view = output
      .to_array_view::<f32>()
      .map_err(|e| ModelError::runtime("输出不是 f32 张量", e))?;

    let probabilities = view.iter().copied().collect::<Vec<_>>();
    debug!("模型推理结果：{:?}", probabilities);
    Ok(probabilities)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{ModelStatus, load_from_location};
  use prost::Message;
  use std::io::Write;
  use tract_onnx::pb;

  fn attribute_int(name: &str, value: i64) -> pb::AttributeProto {
    pb::AttributeProto {
      name: name.to_string(),
      r#type: pb::attribute_proto::AttributeType::Int as i32,
      i: value,
      ..Default::default()
    }
  }

  fn attribute_ints(name: &str, values: Vec<i64>) -> pb::AttributeProto {
    pb::AttributeProto {
      name: name.to_string(),
      r#type: pb::attribute_proto::AttributeType::Ints as i32,
      ints: values,
      ..Default::default()
    }
  }

  fn node(
    op_type: &str,
    inputs: &[&str],
    output: &str,
    attribute: Vec<pb::AttributeProto>,
  ) -> pb::NodeProto {
    pb::NodeProto {
      op_type: op_type.to_string(),
      name: output.to_string(),
      input: inputs.iter().map(|name| name.to_string()).collect(),
      output: vec![output.to_string()],
      attribute,
      ..Default::default()
    }
  }

  fn float_tensor(name: &str, dims: &[i64]) -> pb::ValueInfoProto {
    let dim = dims
      .iter()
      .map(|&d| pb::tensor_shape_proto::Dimension {
        value: Some(pb::tensor_shape_proto::dimension::Value::DimValue(d)),
        ..Default::default()
      })
      .collect();
    pb::ValueInfoProto {
      name: name.to_string(),
      r#type: Some(pb::TypeProto {
        value: Some(pb::type_proto::Value::TensorType(pb::type_proto::Tensor {
          elem_type: pb::tensor_proto::DataType::Float as i32,
          shape: Some(pb::TensorShapeProto { dim }),
        })),
        ..Default::default()
      }),
      ..Default::default()
    }
  }

  /// 对 NHWC 输入按通道取均值，拼接 `copies` 份后做 softmax，输出长度为 `3 * copies`
  fn mean_softmax_model(copies: usize) -> Vec<u8> {
    let concat_inputs = vec!["mean"; copies];
    let graph = pb::GraphProto {
      name: "street".to_string(),
      node: vec![
        node("ReduceMean", &["input"], "mean", vec![attribute_ints("axes", vec![1, 2])]),
        node("Concat", &concat_inputs, "scores", vec![attribute_int("axis", 3)]),
        node("Softmax", &["scores"], "probabilities", vec![attribute_int("axis", 3)]),
      ],
      input: vec![float_tensor("input", &[1, 384, 384, 3])],
      output: vec![float_tensor("probabilities", &[1, 1, 1, 3 * copies as i64])],
      ..Default::default()
    };

    pb::ModelProto {
      ir_version: 7,
      opset_import: vec![pb::OperatorSetIdProto {
        domain: String::new(),
        version: 13,
      }],
      graph: Some(graph),
      ..Default::default()
    }
    .encode_to_vec()
  }

  fn model_file(copies: usize) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".onnx").tempfile().unwrap();
    file.write_all(&mean_softmax_model(copies)).unwrap();
    file.flush().unwrap();
    file
  }

  #[test]
  fn test_build_and_infer() {
    let file = model_file(2);
    let classifier = OnnxClassifierBuilder::new(file.path())
      .expect_classes(6)
      .build::<384, 384>()
      .unwrap();

    let output = classifier.infer(&RgbNhwcTensor::default()).unwrap();
    assert_eq!(output.len(), 6);
    for p in output {
      assert!((p - 1.0 / 6.0).abs() < 1e-5, "probability was {p}");
    }
  }

  #[test]
  fn test_build_rejects_output_mismatch() {
    let file = model_file(3);
    let err = OnnxClassifierBuilder::new(file.path())
      .expect_classes(6)
      .build::<384, 384>()
      .err()
      .unwrap();

    assert!(matches!(
      err,
      ModelError::OutputMismatch {
        expected: 6,
        actual: 9
      }
    ));
  }

  #[test]
  fn test_load_from_location_reports_status() {
    let good = model_file(2);
    let state = load_from_location(good.path().to_str().unwrap(), 6);
    assert_eq!(state.status(), ModelStatus::Loaded);
    let output = state.model().unwrap().infer(&RgbNhwcTensor::default()).unwrap();
    assert_eq!(output.len(), 6);

    let mismatched = model_file(3);
    let state = load_from_location(mismatched.path().to_str().unwrap(), 6);
    assert_eq!(state.status(), ModelStatus::Error);
    assert!(state.model().is_none());
    assert_eq!(
      state.error_message().as_deref(),
      Some("model produces 9 outputs, label table has 6")
    );
  }

  #[test]
  fn test_build_fails_on_missing_file() {
    let err = OnnxClassifierBuilder::new("/nonexistent/model.onnx")
      .build::<384, 384>()
      .err()
      .unwrap();
    assert!(matches!(err, ModelError::Io(_)));
  }
}
