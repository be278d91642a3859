/// debug label 使用的颜色
pub struct LabelColor;
impl LabelColor {
    const _RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
    const GREEN: [f32; 4] = [0.0, 1.0, 0.0, 1.0];
    const BLUE: [f32; 4] = [0.0, 0.0, 1.0, 1.0];
    const YELLOW: [f32; 4] = [1.0, 1.0, 0.0, 1.0];
    const CYAN: [f32; 4] = [0.0, 1.0, 1.0, 1.0];
    const MAGENTA: [f32; 4] = [1.0, 0.0, 1.0, 1.0];

    pub const COLOR_PASS: [f32; 4] = Self::BLUE;
    pub const COLOR_SUBPASS: [f32; 4] = Self::CYAN;
    pub const COLOR_STAGE: [f32; 4] = Self::YELLOW;
    pub const COLOR_CMD: [f32; 4] = Self::GREEN;
    pub const COLOR_UPLOAD: [f32; 4] = Self::MAGENTA;
}
