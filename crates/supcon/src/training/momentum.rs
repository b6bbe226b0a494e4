//! Exponential-moving-average update of teacher parameters from the student.
//!
//! `teacher = m * teacher + (1 - m) * student` for every float tensor the
//! module exposes. Tensors are paired by visit order, which is the field
//! declaration order of the derived `Module` and therefore identical for two
//! modules built from the same config. Shapes are checked at every position.

use burn::module::{Module, ModuleMapper, ModuleVisitor, ParamId};
use burn::prelude::*;

use crate::error::SupConError;

/// Collects every float tensor of a module, flattened, with its original shape.
struct ParamCollector<B: Backend> {
    tensors: Vec<(Vec<usize>, Tensor<B, 1>)>,
}

impl<B: Backend> ModuleVisitor<B> for ParamCollector<B> {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        let dims = tensor.dims().to_vec();
        let numel: usize = dims.iter().product();
        self.tensors.push((dims, tensor.clone().reshape([numel])));
    }
}

/// Blends collected student tensors into the teacher, position by position.
struct MomentumMapper<B: Backend> {
    student: Vec<(Vec<usize>, Tensor<B, 1>)>,
    momentum: f64,
    position: usize,
    error: Option<SupConError>,
}

impl<B: Backend> ModuleMapper<B> for MomentumMapper<B> {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        let index = self.position;
        self.position += 1;
        if self.error.is_some() {
            return tensor;
        }

        let teacher_dims = tensor.dims().to_vec();
        let Some((student_dims, student)) = self.student.get(index) else {
            self.error = Some(SupConError::ParameterMismatch {
                index,
                student: Vec::new(),
                teacher: teacher_dims,
            });
            return tensor;
        };
        if *student_dims != teacher_dims {
            self.error = Some(SupConError::ParameterMismatch {
                index,
                student: student_dims.clone(),
                teacher: teacher_dims,
            });
            return tensor;
        }
        let device = tensor.device();
        if student.device() != device {
            self.error = Some(SupConError::DeviceMismatch {
                expected: format!("{device:?}"),
                found: format!("{:?}", student.device()),
            });
            return tensor;
        }

        let student = student.clone().reshape(tensor.dims());
        tensor.mul_scalar(self.momentum) + student.mul_scalar(1.0 - self.momentum)
    }
}

/// Blend student parameters into the teacher: `t = m * t + (1 - m) * s`.
///
/// `m = 0` copies the student exactly; `m = 1` leaves the teacher untouched.
/// Pass the student's non-autodiff view (`student.valid()`) so the teacher
/// stays detached from the student's graph.
///
/// # Errors
/// - [`SupConError::InvalidConfig`] if `momentum` is outside `[0, 1]`
/// - [`SupConError::ParameterMismatch`] if counts or shapes differ
/// - [`SupConError::DeviceMismatch`] if paired tensors live on different devices
pub fn momentum_update<B: Backend, M: Module<B>>(
    student: &M,
    teacher: M,
    momentum: f64,
) -> Result<M, SupConError> {
    if !(0.0..=1.0).contains(&momentum) {
        return Err(SupConError::InvalidConfig(format!(
            "momentum must be in [0, 1], got {momentum}"
        )));
    }

    let mut collector = ParamCollector { tensors: Vec::new() };
    student.visit(&mut collector);
    let student_count = collector.tensors.len();

    let mut mapper = MomentumMapper {
        student: collector.tensors,
        momentum,
        position: 0,
        error: None,
    };
    let updated = teacher.map(&mut mapper);

    if let Some(err) = mapper.error {
        return Err(err);
    }
    if mapper.position != student_count {
        return Err(SupConError::ParameterMismatch {
            index: mapper.position.min(student_count),
            student: vec![student_count],
            teacher: vec![mapper.position],
        });
    }

    Ok(updated)
}
