use anyhow::{Context, Result};
use image::{imageops::FilterType, RgbImage};
use std::{ffi::CString, os::raw::{c_char, c_int, c_void}, ptr};
use tracing::{debug, info};

use crate::decode::{decode_ssd, decode_ultralytics, nms_filter, OutputLayout};
use crate::{Detection, Detector, DetectorConfig};

#[repr(C)]
struct TfLiteModel;
#[repr(C)]
struct TfLiteInterpreterOptions;
#[repr(C)]
struct TfLiteInterpreter;
#[repr(C)]
struct TfLiteTensor;
#[repr(C)]
struct TfLiteDelegate;

#[link(name = "tensorflowlite_c")]
extern "C" {
    fn TfLiteModelCreateFromFile(model_path: *const c_char) -> *mut TfLiteModel;
    fn TfLiteModelDelete(model: *mut TfLiteModel);

    fn TfLiteInterpreterOptionsCreate() -> *mut TfLiteInterpreterOptions;
    fn TfLiteInterpreterOptionsDelete(options: *mut TfLiteInterpreterOptions);
    fn TfLiteInterpreterOptionsSetNumThreads(options: *mut TfLiteInterpreterOptions, num_threads: c_int);
    #[cfg_attr(not(feature = "vision-coral"), allow(dead_code))]
    fn TfLiteInterpreterOptionsAddDelegate(options: *mut TfLiteInterpreterOptions, delegate: *mut TfLiteDelegate);

    fn TfLiteInterpreterCreate(model: *const TfLiteModel, options: *const TfLiteInterpreterOptions) -> *mut TfLiteInterpreter;
    fn TfLiteInterpreterDelete(interpreter: *mut TfLiteInterpreter);

    fn TfLiteInterpreterAllocateTensors(interpreter: *mut TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterInvoke(interpreter: *mut TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterGetOutputTensorCount(interpreter: *const TfLiteInterpreter) -> c_int;

    fn TfLiteInterpreterGetInputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *mut TfLiteTensor;
    fn TfLiteInterpreterGetOutputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *const TfLiteTensor;

    fn TfLiteTensorData(tensor: *const TfLiteTensor) -> *mut c_void;
    fn TfLiteTensorByteSize(tensor: *const TfLiteTensor) -> usize;

    fn TfLiteTensorNumDims(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorDim(tensor: *const TfLiteTensor, dim_index: c_int) -> c_int;
}

#[cfg(feature = "vision-coral")]
#[link(name = "edgetpu")]
extern "C" {
    fn edgetpu_create_delegate(device_type: c_int, device_path: *const c_char, options: *const c_char) -> *mut TfLiteDelegate;
    fn edgetpu_free_delegate(delegate: *mut TfLiteDelegate);
}

pub struct TfliteDetector {
    cfg: DetectorConfig,
    model: *mut TfLiteModel,
    opts: *mut TfLiteInterpreterOptions,
    interp: *mut TfLiteInterpreter,
    #[cfg(feature = "vision-coral")]
    delegate: Option<*mut TfLiteDelegate>,
}

// The interpreter is only ever touched through `&mut self`.
unsafe impl Send for TfliteDetector {}

impl TfliteDetector {
    pub fn new(cfg: DetectorConfig) -> Result<Self> {
        let model_path = match (&cfg.model_path_edgetpu, cfg.use_coral) {
            (Some(p), true) => p.clone(),
            _ => cfg.model_path.clone(),
        };
        let cpath = CString::new(model_path.to_string_lossy().as_bytes())?;
        let model = unsafe { TfLiteModelCreateFromFile(cpath.as_ptr()) };
        anyhow::ensure!(!model.is_null(), "failed to load tflite model: {}", model_path.display());

        let opts = unsafe { TfLiteInterpreterOptionsCreate() };
        anyhow::ensure!(!opts.is_null(), "failed to create tflite options");
        unsafe { TfLiteInterpreterOptionsSetNumThreads(opts, cfg.threads.max(1)); }

        #[cfg(feature = "vision-coral")]
        let delegate = if cfg.use_coral {
            let d = unsafe { edgetpu_create_delegate(0, ptr::null(), ptr::null()) };
            anyhow::ensure!(!d.is_null(), "failed to create EdgeTPU delegate");
            unsafe { TfLiteInterpreterOptionsAddDelegate(opts, d); }
            Some(d)
        } else { None };

        #[cfg(not(feature = "vision-coral"))]
        if cfg.use_coral {
            anyhow::bail!("vision.use_coral=true but binary not built with --features vision-coral");
        }

        let interp = unsafe { TfLiteInterpreterCreate(model, opts) };
        anyhow::ensure!(!interp.is_null(), "failed to create tflite interpreter");

        let rc = unsafe { TfLiteInterpreterAllocateTensors(interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterAllocateTensors failed");

        info!("vision: loaded TFLite model: {}", model_path.display());

        Ok(Self {
            cfg, model, opts, interp,
            #[cfg(feature = "vision-coral")]
            delegate,
        })
    }

    pub fn inspect(&mut self) -> Result<String> {
        let input = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!input.is_null(), "no input tensor");
        let mut report = format!(
            "TFLite inspect:\n- input[0] dims={:?} bytes={}\n",
            tensor_dims(input),
            unsafe { TfLiteTensorByteSize(input) }
        );

        let outputs = unsafe { TfLiteInterpreterGetOutputTensorCount(self.interp) };
        for i in 0..outputs {
            let out = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, i) };
            anyhow::ensure!(!out.is_null(), "no output tensor {}", i);
            report.push_str(&format!(
                "- output[{}] dims={:?} bytes={}\n",
                i,
                tensor_dims(out),
                unsafe { TfLiteTensorByteSize(out) }
            ));
        }
        Ok(report)
    }

    fn output_f32(&mut self, index: c_int) -> Result<(Vec<i32>, &[f32])> {
        let out = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, index) };
        anyhow::ensure!(!out.is_null(), "no output tensor {}", index);
        let dims = tensor_dims(out);

        let out_ptr = unsafe { TfLiteTensorData(out) as *const f32 };
        anyhow::ensure!(!out_ptr.is_null(), "null output tensor {} data", index);
        let len = unsafe { TfLiteTensorByteSize(out) } / std::mem::size_of::<f32>();
        Ok((dims, unsafe { std::slice::from_raw_parts(out_ptr, len) }))
    }

    fn decode(&mut self, frame_w: u32, frame_h: u32) -> Result<Vec<Detection>> {
        let labels = self.cfg.labels.clone();
        let conf_th = self.cfg.conf_threshold;

        match self.cfg.output_layout {
            OutputLayout::Ssd => {
                let boxes = self.output_f32(0)?.1.to_vec();
                let classes = self.output_f32(1)?.1.to_vec();
                let scores = self.output_f32(2)?.1.to_vec();
                let count = self.output_f32(3)?.1.first().copied().unwrap_or(0.0).max(0.0) as usize;
                Ok(decode_ssd(&boxes, &classes, &scores, count, &labels, conf_th, frame_w, frame_h))
            }
            OutputLayout::Ultralytics => {
                let (dims, raw) = self.output_f32(0)?;
                let (num_preds, stride) = match dims.as_slice() {
                    [1, n, s] => (*n as usize, *s as usize),
                    [n, s] => (*n as usize, *s as usize),
                    other => anyhow::bail!(
                        "unexpected output dims {:?}. Run `camwatch vision inspect` and set vision.output_layout accordingly.",
                        other
                    ),
                };
                anyhow::ensure!(
                    stride == 5 + labels.len(),
                    "stride mismatch: got {}, expected {} for {} labels",
                    stride, 5 + labels.len(), labels.len()
                );
                Ok(decode_ultralytics(raw, num_preds, &labels, conf_th, frame_w, frame_h))
            }
        }
    }
}

impl Detector for TfliteDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let resized = image::imageops::resize(frame, self.cfg.img_w, self.cfg.img_h, FilterType::Triangle);

        // assumes u8 RGB input (quant/edgetpu-friendly)
        let input = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!input.is_null(), "no input tensor");

        let in_bytes = unsafe { TfLiteTensorByteSize(input) };
        let in_ptr = unsafe { TfLiteTensorData(input) as *mut u8 };
        anyhow::ensure!(!in_ptr.is_null(), "null input tensor data");

        let need = (self.cfg.img_w * self.cfg.img_h * 3) as usize;
        anyhow::ensure!(in_bytes >= need, "input tensor too small: {} < {}", in_bytes, need);
        unsafe { ptr::copy_nonoverlapping(resized.as_raw().as_ptr(), in_ptr, need); }

        let rc = unsafe { TfLiteInterpreterInvoke(self.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterInvoke failed");

        let dets = self.decode(frame.width(), frame.height()).context("decode model output")?;
        let kept = nms_filter(dets, self.cfg.nms_iou_threshold, self.cfg.max_detections);
        debug!("vision: {} detections", kept.len());
        Ok(kept)
    }
}

fn tensor_dims(t: *const TfLiteTensor) -> Vec<i32> {
    unsafe {
        let nd = TfLiteTensorNumDims(t);
        (0..nd).map(|i| TfLiteTensorDim(t, i)).collect()
    }
}

impl Drop for TfliteDetector {
    fn drop(&mut self) {
        unsafe {
            if !self.interp.is_null() { TfLiteInterpreterDelete(self.interp); }
            if !self.opts.is_null() { TfLiteInterpreterOptionsDelete(self.opts); }
            if !self.model.is_null() { TfLiteModelDelete(self.model); }
        }
        #[cfg(feature = "vision-coral")]
        unsafe {
            if let Some(d) = self.delegate {
                edgetpu_free_delegate(d);
            }
        }
    }
}
