// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 卡尔曼滤波器 (匀速运动模型)
//! Constant-velocity Kalman filter over the box centre

use nalgebra::{Matrix2, Matrix2x4, Matrix4, Matrix4x2, Vector2, Vector4};

use super::types::BBox;

/// 单个跟踪框的卡尔曼滤波器
///
/// 状态向量: [cx, cy, vx, vy], 观测: [cx, cy]。
/// 宽高不进入滤波, 直接取最近一次观测值。
#[derive(Clone, Debug)]
pub struct KalmanBoxFilter {
    /// 状态估计
    x: Vector4<f32>,
    /// 估计误差协方差
    p: Matrix4<f32>,
    /// 状态转移 (dt = 1)
    f: Matrix4<f32>,
    /// 观测矩阵: 取出 [cx, cy]
    h: Matrix2x4<f32>,
    /// 过程噪声
    q: Matrix4<f32>,
    /// 观测噪声
    r: Matrix2<f32>,
    width: f32,
    height: f32,
}

impl KalmanBoxFilter {
    /// 以检测框为初值创建滤波器
    ///
    /// # 参数
    /// - `q`: 过程噪声 (越小越信任预测)
    /// - `r`: 观测噪声 (越大越平滑)
    pub fn new(bbox: &BBox, q: f32, r: f32) -> Self {
        let (cx, cy) = bbox.center();
        #[rustfmt::skip]
        let f = Matrix4::new(
            1.0, 0.0, 1.0, 0.0,
            0.0, 1.0, 0.0, 1.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );
        Self {
            x: Vector4::new(cx, cy, 0.0, 0.0),
            p: Matrix4::identity() * 10.0,
            f,
            h: Matrix2x4::new(1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0),
            q: Matrix4::identity() * q,
            r: Matrix2::identity() * r,
            width: bbox.width(),
            height: bbox.height(),
        }
    }

    /// 预测下一步状态并返回预测框
    pub fn predict(&mut self) -> BBox {
        self.x = self.f * self.x;
        self.p = self.f * self.p * self.f.transpose() + self.q;
        self.state_bbox()
    }

    /// 用观测框中心修正状态, 宽高直接替换
    pub fn update(&mut self, bbox: &BBox) {
        let (cx, cy) = bbox.center();
        let z = Vector2::new(cx, cy);
        let y = z - self.h * self.x;
        let s = self.h * self.p * self.h.transpose() + self.r;
        if let Some(s_inv) = s.try_inverse() {
            let k: Matrix4x2<f32> = self.p * self.h.transpose() * s_inv;
            self.x += k * y;
            self.p = (Matrix4::identity() - k * self.h) * self.p;
        }
        self.width = bbox.width();
        self.height = bbox.height();
    }

    /// 当前状态对应的边界框 (不推进滤波器)
    pub fn state_bbox(&self) -> BBox {
        BBox::from_center(self.x[0], self.x[1], self.width.max(1.0), self.height.max(1.0))
    }

    pub fn velocity(&self) -> (f32, f32) {
        (self.x[2], self.x[3])
    }
}
