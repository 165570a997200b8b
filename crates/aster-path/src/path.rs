//! 2D 路径：SVG 风格的命令序列与折线化
//!
//! 路径由若干 contour 组成，每个 contour 以 MoveTo 开头。
//! `trace` 按固定段数细分；`flatten` 按弦误差容限自适应细分
//! （T.F. Hain 的切线法）。折线与顶点 buffer 的消费方无关，
//! 调用方拿到顶点列表之后自行上传。

use glam::Vec2;
use thiserror::Error;

/// 单条路径命令，坐标都是绝对坐标
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PathCommand {
    MoveTo(Vec2),
    LineTo(Vec2),
    QuadBezierTo { ctrl: Vec2, to: Vec2 },
    CubicBezierTo { ctrl1: Vec2, ctrl2: Vec2, to: Vec2 },
    ClosePath,
}

/// 子路径
#[derive(Clone, Debug, Default)]
pub struct Contour {
    pub commands: Vec<PathCommand>,
}

/// 细分之后的折线
///
/// 闭合路径的切线数量与顶点相同，开放路径少一个。
#[derive(Clone, Debug, Default)]
pub struct Polyline {
    pub vertices: Vec<Vec2>,
    pub tangents: Vec<Vec2>,
    /// 每个顶点处的累积弧长
    pub distances: Vec<f32>,
    pub total_distance: f32,
}

#[derive(Debug, Clone, Error)]
pub enum PathParseError {
    #[error("unexpected input at byte {offset}")]
    UnexpectedInput { offset: usize },
}

#[derive(Clone, Debug, Default)]
pub struct Path {
    contours: Vec<Contour>,
    polylines: Vec<Polyline>,
}

// 命令构建
impl Path {
    /// 弦误差容限的缺省值（模型单位）
    pub const DEFAULT_TOLERANCE: f32 = 0.04;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.contours.clear();
        self.polylines.clear();
    }

    #[inline]
    pub fn contours(&self) -> &[Contour] {
        &self.contours
    }

    #[inline]
    pub fn polylines(&self) -> &[Polyline] {
        &self.polylines
    }

    /// 所有 contour 的命令打平成一个序列
    pub fn commands(&self) -> Vec<PathCommand> {
        self.contours.iter().flat_map(|c| c.commands.iter().copied()).collect()
    }

    /// 当前画笔位置
    fn current_point(&self) -> Vec2 {
        let Some(contour) = self.contours.last() else {
            return Vec2::ZERO;
        };
        match contour.commands.last() {
            Some(PathCommand::MoveTo(p)) | Some(PathCommand::LineTo(p)) => *p,
            Some(PathCommand::QuadBezierTo { to, .. }) | Some(PathCommand::CubicBezierTo { to, .. }) => *to,
            Some(PathCommand::ClosePath) | None => contour
                .commands
                .first()
                .map(|c| match c {
                    PathCommand::MoveTo(p) => *p,
                    _ => Vec2::ZERO,
                })
                .unwrap_or(Vec2::ZERO),
        }
    }

    /// 开启一个新的 contour
    pub fn move_to(&mut self, p: Vec2) -> &mut Self {
        self.contours.push(Contour {
            commands: vec![PathCommand::MoveTo(p)],
        });
        self
    }

    fn push_command(&mut self, command: PathCommand) {
        assert!(!self.contours.is_empty(), "path must start with move_to");
        self.contours.last_mut().unwrap().commands.push(command);
    }

    pub fn line_to(&mut self, p: Vec2) -> &mut Self {
        self.push_command(PathCommand::LineTo(p));
        self
    }

    /// 水平线；折叠成 LineTo
    pub fn horiz_line_to(&mut self, x: f32) -> &mut Self {
        let current = self.current_point();
        self.line_to(Vec2::new(x, current.y))
    }

    /// 垂直线；折叠成 LineTo
    pub fn vert_line_to(&mut self, y: f32) -> &mut Self {
        let current = self.current_point();
        self.line_to(Vec2::new(current.x, y))
    }

    pub fn quad_bezier_to(&mut self, ctrl: Vec2, to: Vec2) -> &mut Self {
        self.push_command(PathCommand::QuadBezierTo { ctrl, to });
        self
    }

    pub fn cubic_bezier_to(&mut self, ctrl1: Vec2, ctrl2: Vec2, to: Vec2) -> &mut Self {
        self.push_command(PathCommand::CubicBezierTo { ctrl1, ctrl2, to });
        self
    }

    pub fn close(&mut self) -> &mut Self {
        self.push_command(PathCommand::ClosePath);
        self
    }
}

// 简化 SVG 的解析与输出
impl Path {
    /// 解析只含 {M, L, H, V, Q, C, Z} 且坐标为绝对值的路径串
    pub fn add_from_simplified_svg(&mut self, svg: &str) -> Result<(), PathParseError> {
        let mut parser = SvgParser::new(svg);

        loop {
            parser.skip_separators();
            let Some(op) = parser.next_byte() else {
                return Ok(());
            };
            match op {
                b'M' => {
                    let p = parser.coordinate_pair()?;
                    self.move_to(p);
                }
                b'L' => {
                    let p = parser.coordinate_pair()?;
                    self.line_to(p);
                }
                b'H' => {
                    let x = parser.number()?;
                    self.horiz_line_to(x);
                }
                b'V' => {
                    let y = parser.number()?;
                    self.vert_line_to(y);
                }
                b'Q' => {
                    let ctrl = parser.coordinate_pair()?;
                    let to = parser.coordinate_pair()?;
                    self.quad_bezier_to(ctrl, to);
                }
                b'C' => {
                    let ctrl1 = parser.coordinate_pair()?;
                    let ctrl2 = parser.coordinate_pair()?;
                    let to = parser.coordinate_pair()?;
                    self.cubic_bezier_to(ctrl1, ctrl2, to);
                }
                b'Z' => {
                    self.close();
                }
                _ => {
                    return Err(PathParseError::UnexpectedInput {
                        offset: parser.pos - 1,
                    });
                }
            }
        }
    }

    /// 输出简化 SVG；H/V 在解析时已折叠，这里只产生 {M, L, Q, C, Z}
    pub fn to_svg(&self) -> String {
        use std::fmt::Write;

        let mut svg = String::new();
        for contour in &self.contours {
            for command in &contour.commands {
                match command {
                    PathCommand::MoveTo(p) => write!(svg, "M {} {} ", p.x, p.y).unwrap(),
                    PathCommand::LineTo(p) => write!(svg, "L {} {} ", p.x, p.y).unwrap(),
                    PathCommand::QuadBezierTo { ctrl, to } => {
                        write!(svg, "Q {} {} {} {} ", ctrl.x, ctrl.y, to.x, to.y).unwrap()
                    }
                    PathCommand::CubicBezierTo { ctrl1, ctrl2, to } => {
                        write!(svg, "C {} {} {} {} {} {} ", ctrl1.x, ctrl1.y, ctrl2.x, ctrl2.y, to.x, to.y).unwrap()
                    }
                    PathCommand::ClosePath => svg.push_str("Z "),
                }
            }
        }
        svg.trim_end().to_string()
    }
}

struct SvgParser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> SvgParser<'a> {
    fn new(svg: &'a str) -> Self {
        Self {
            bytes: svg.as_bytes(),
            pos: 0,
        }
    }

    fn skip_separators(&mut self) {
        while self.pos < self.bytes.len() && matches!(self.bytes[self.pos], b' ' | b'\t' | b'\n' | b'\r' | b',') {
            self.pos += 1;
        }
    }

    fn next_byte(&mut self) -> Option<u8> {
        if self.pos >= self.bytes.len() {
            return None;
        }
        let byte = self.bytes[self.pos];
        self.pos += 1;
        Some(byte)
    }

    fn number(&mut self) -> Result<f32, PathParseError> {
        self.skip_separators();
        let start = self.pos;
        while self.pos < self.bytes.len() && matches!(self.bytes[self.pos], b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
        {
            self.pos += 1;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(PathParseError::UnexpectedInput { offset: start })
    }

    fn coordinate_pair(&mut self) -> Result<Vec2, PathParseError> {
        let x = self.number()?;
        let y = self.number()?;
        Ok(Vec2::new(x, y))
    }
}

// 细分
impl Path {
    /// 固定段数细分每条曲线
    pub fn trace(&mut self, resolution: usize) {
        self.polylines = self
            .contours
            .iter()
            .map(|contour| {
                let mut polyline = Polyline::default();
                for command in &contour.commands {
                    match *command {
                        PathCommand::MoveTo(p) => trace_move_to(&mut polyline, p),
                        PathCommand::LineTo(p) => trace_line_to(&mut polyline, p),
                        PathCommand::QuadBezierTo { ctrl, to } => {
                            trace_quad_bezier_to(&mut polyline, to, ctrl, resolution)
                        }
                        PathCommand::CubicBezierTo { ctrl1, ctrl2, to } => {
                            trace_cubic_bezier_to(&mut polyline, to, ctrl1, ctrl2, resolution)
                        }
                        PathCommand::ClosePath => trace_close(&mut polyline),
                    }
                }
                debug_assert_eq!(polyline.vertices.len(), polyline.distances.len());
                polyline
            })
            .collect();
    }

    /// 按弦误差容限自适应细分
    ///
    /// `tolerance` 是每段折线到曲线的最大允许距离；以调用方给定的值
    /// 为准，未指定时用 `DEFAULT_TOLERANCE`。二次曲线按首控制点重复
    /// 的方式提升为三次处理。
    pub fn flatten(&mut self, tolerance: f32) {
        self.polylines = self
            .contours
            .iter()
            .map(|contour| {
                let mut polyline = Polyline::default();
                for command in &contour.commands {
                    match *command {
                        PathCommand::MoveTo(p) => trace_move_to(&mut polyline, p),
                        PathCommand::LineTo(p) => trace_line_to(&mut polyline, p),
                        PathCommand::QuadBezierTo { ctrl, to } => {
                            flatten_cubic_bezier_to(&mut polyline, to, ctrl, ctrl, tolerance)
                        }
                        PathCommand::CubicBezierTo { ctrl1, ctrl2, to } => {
                            flatten_cubic_bezier_to(&mut polyline, to, ctrl1, ctrl2, tolerance)
                        }
                        PathCommand::ClosePath => trace_close(&mut polyline),
                    }
                }
                polyline
            })
            .collect();
    }

    /// 把已细分的折线重采样成等间距
    pub fn resample(&mut self, interval: f32) {
        assert!(interval > 0.0);
        for polyline in &mut self.polylines {
            *polyline = resample_polyline(polyline, interval);
        }
    }

    /// 折线上弧长参数 t ∈ [0,1] 处的插值位置
    pub fn point_at(&self, polyline_index: usize, t: f32) -> Option<Vec2> {
        let polyline = self.polylines.get(polyline_index)?;
        Some(polyline_point_at(polyline, t))
    }
}

fn trace_move_to(polyline: &mut Polyline, p: Vec2) {
    polyline.distances.push(0.0);
    polyline.vertices.push(p);
    // 至少两个点才有切线
}

fn trace_line_to(polyline: &mut Polyline, p: Vec2) {
    let Some(&prev) = polyline.vertices.last() else {
        trace_move_to(polyline, p);
        return;
    };

    let delta = p - prev;
    let dist_sq = delta.length_squared();

    // 与上一个点重合的点不重复记录，避免零长度段
    const EPSILON_SQ: f32 = f32::EPSILON * f32::EPSILON;
    if dist_sq <= EPSILON_SQ {
        return;
    }

    polyline.total_distance += dist_sq.sqrt();
    polyline.distances.push(polyline.total_distance);
    polyline.vertices.push(p);
    polyline.tangents.push(delta);
}

fn trace_close(polyline: &mut Polyline) {
    if let Some(&first) = polyline.vertices.first() {
        trace_line_to(polyline, first);
    }
}

fn trace_quad_bezier_to(polyline: &mut Polyline, to: Vec2, ctrl: Vec2, resolution: usize) {
    if resolution == 0 {
        return;
    }
    if resolution == 1 {
        trace_line_to(polyline, to);
        return;
    }

    let p0 = *polyline.vertices.last().expect("contour must start with move_to");
    let mut prev = p0;

    let delta_t = 1.0 / resolution as f32;
    for i in 1..=resolution {
        let t = i as f32 * delta_t;
        let one_minus_t = 1.0 - t;

        let b = one_minus_t * one_minus_t * p0 + 2.0 * one_minus_t * t * ctrl + t * t * to;

        polyline.total_distance += b.distance(prev);
        polyline.distances.push(polyline.total_distance);
        polyline.vertices.push(b);
        // 对 t 的一阶导数
        polyline.tangents.push(2.0 * one_minus_t * (ctrl - p0) + 2.0 * t * (to - ctrl));
        prev = b;
    }
}

fn trace_cubic_bezier_to(polyline: &mut Polyline, to: Vec2, ctrl1: Vec2, ctrl2: Vec2, resolution: usize) {
    if resolution == 0 {
        return;
    }
    if resolution == 1 {
        trace_line_to(polyline, to);
        return;
    }

    let p0 = *polyline.vertices.last().expect("contour must start with move_to");
    let mut prev = p0;

    let delta_t = 1.0 / resolution as f32;
    for i in 1..=resolution {
        let t = i as f32 * delta_t;
        let t_sq = t * t;
        let one_minus_t = 1.0 - t;
        let one_minus_t_sq = one_minus_t * one_minus_t;

        let b = one_minus_t_sq * one_minus_t * p0
            + 3.0 * one_minus_t_sq * t * ctrl1
            + 3.0 * one_minus_t * t_sq * ctrl2
            + t_sq * t * to;

        polyline.total_distance += b.distance(prev);
        polyline.distances.push(polyline.total_distance);
        polyline.vertices.push(b);
        polyline.tangents.push(
            3.0 * one_minus_t_sq * (ctrl1 - p0) + 6.0 * one_minus_t * t * (ctrl2 - ctrl1) + 3.0 * t_sq * (to - ctrl2),
        );
        prev = b;
    }
}

/// 在 t 处把三次 bezier `b` 分成两段，返回后一段
fn bezier_subdivide_tail(b: [Vec2; 4], t: f32) -> [Vec2; 4] {
    let b2_ = b[2] + t * (b[3] - b[2]);
    let b1_ = b[1] + t * (b[2] - b[1]);
    let b0_ = b[0] + t * (b[1] - b[0]);
    let b0__ = b0_ + t * (b1_ - b0_);
    let b1__ = b1_ + t * (b2_ - b1_);
    let b0___ = b0__ + t * (b1__ - b0__);

    [b0___, b1__, b2_, b[3]]
}

/// Hain 切线法：在以起点和首控制点定义的局部坐标系里，
/// 由 `tolerance` 解出单步能走多远，然后细分剩余曲线继续。
fn flatten_cubic_bezier_to(polyline: &mut Polyline, to: Vec2, ctrl1: Vec2, ctrl2: Vec2, tolerance: f32) {
    let p0 = *polyline.vertices.last().expect("contour must start with move_to");
    let mut prev = p0;

    let mut b = [p0, ctrl1, ctrl2, to];

    loop {
        // 局部坐标基：x 轴沿起点到首控制点的方向
        let dir = b[1] - b[0];
        if dir.length_squared() <= f32::EPSILON {
            // 退化：控制点与起点重合，直接连到终点
            trace_line_to(polyline, b[3]);
            return;
        }
        let r = dir.normalize();
        let s = Vec2::new(r.y, -r.x);
        // 基是正交的，逆变换与正变换相同
        let basis = glam::Mat2::from_cols(r, s);

        b[1] = basis * (b[1] - b[0]);
        b[2] = basis * (b[2] - b[0]);
        b[3] = basis * (b[3] - b[0]);
        b[0] = Vec2::ZERO;

        let t_dash = (tolerance / (3.0 * b[2].y.abs())).sqrt();
        let t = (2.0 * t_dash).min(1.0);

        let t_sq = t * t;
        let t_cub = t_sq * t;
        let pt = b[0]
            + 3.0 * (b[1] - b[0]) * t
            + 3.0 * (b[2] - 2.0 * b[1] + b[0]) * t_sq
            + (b[3] - 3.0 * b[2] + 3.0 * b[1] - b[0]) * t_cub;

        // 变换回原坐标系
        let pt = prev + basis * pt;

        polyline.total_distance += pt.distance(prev);
        polyline.distances.push(polyline.total_distance);
        polyline.vertices.push(pt);
        polyline.tangents.push(Vec2::ZERO);

        if t >= 1.0 {
            return;
        }

        // 细分出剩余曲线，变换回原坐标系，下一轮继续
        b = bezier_subdivide_tail(b, t);
        b[0] = prev + basis * b[0];
        b[1] = prev + basis * b[1];
        b[2] = prev + basis * b[2];
        b[3] = prev + basis * b[3];

        prev = pt;
    }
}

fn polyline_point_at(polyline: &Polyline, t: f32) -> Vec2 {
    if polyline.vertices.len() < 2 {
        return polyline.vertices.first().copied().unwrap_or(Vec2::ZERO);
    }

    let target = t.clamp(0.0, 1.0) * polyline.total_distance;
    let next = polyline.distances.partition_point(|&d| d < target).min(polyline.vertices.len() - 1).max(1);
    let prev = next - 1;

    let segment = polyline.distances[next] - polyline.distances[prev];
    let fraction = if segment > 0.0 { (target - polyline.distances[prev]) / segment } else { 0.0 };
    polyline.vertices[prev].lerp(polyline.vertices[next], fraction)
}

fn resample_polyline(polyline: &Polyline, interval: f32) -> Polyline {
    if polyline.vertices.len() < 2 || polyline.total_distance <= 0.0 {
        return polyline.clone();
    }

    let segment_count = (polyline.total_distance / interval).round().max(1.0) as usize;

    let mut resampled = Polyline::default();
    trace_move_to(&mut resampled, polyline.vertices[0]);
    for i in 1..=segment_count {
        let t = i as f32 / segment_count as f32;
        trace_line_to(&mut resampled, polyline_point_at(polyline, t));
    }
    resampled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_svg_round_trip_reproduces_commands() {
        let svg = "M 10 10 L 20 10 H 30 V 20 Q 35 25 40 20 C 45 15 50 25 55 20 Z";
        let mut path = Path::new();
        path.add_from_simplified_svg(svg).unwrap();

        let mut reparsed = Path::new();
        reparsed.add_from_simplified_svg(&path.to_svg()).unwrap();

        assert_eq!(path.commands(), reparsed.commands());
    }

    #[test]
    fn test_h_and_v_fold_into_line_to() {
        let mut path = Path::new();
        path.add_from_simplified_svg("M 0 0 H 10 V 5").unwrap();

        let commands = path.commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[1], PathCommand::LineTo(Vec2::new(10.0, 0.0)));
        assert_eq!(commands[2], PathCommand::LineTo(Vec2::new(10.0, 5.0)));
    }

    #[test]
    fn test_parse_rejects_unknown_instruction() {
        let mut path = Path::new();
        let result = path.add_from_simplified_svg("M 0 0 A 1 2");
        assert!(matches!(result, Err(PathParseError::UnexpectedInput { .. })));
    }

    #[test]
    fn test_trace_emits_resolution_segments() {
        let mut path = Path::new();
        path.move_to(Vec2::ZERO).quad_bezier_to(Vec2::new(5.0, 10.0), Vec2::new(10.0, 0.0));
        path.trace(8);

        let polyline = &path.polylines()[0];
        // MoveTo 1 个顶点 + 8 段
        assert_eq!(polyline.vertices.len(), 9);
        assert_eq!(polyline.vertices.len(), polyline.distances.len());
        assert!((polyline.vertices[8] - Vec2::new(10.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_close_path_returns_to_start() {
        let mut path = Path::new();
        path.move_to(Vec2::ZERO)
            .line_to(Vec2::new(10.0, 0.0))
            .line_to(Vec2::new(10.0, 10.0))
            .close();
        path.trace(4);

        let polyline = &path.polylines()[0];
        assert_eq!(*polyline.vertices.last().unwrap(), Vec2::ZERO);
        // 闭合路径：切线数量 == 顶点数量 - 1 + 1（闭合段）
        assert_eq!(polyline.tangents.len(), polyline.vertices.len() - 1);
    }

    #[test]
    fn test_flatten_reaches_curve_end() {
        let mut path = Path::new();
        path.move_to(Vec2::ZERO).cubic_bezier_to(
            Vec2::new(0.0, 10.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(10.0, 0.0),
        );
        path.flatten(Path::DEFAULT_TOLERANCE);

        let polyline = &path.polylines()[0];
        assert!(polyline.vertices.len() > 2);
        assert!((polyline.vertices.last().unwrap() - Vec2::new(10.0, 0.0)).length() < 1e-3);
    }

    #[test]
    fn test_tighter_tolerance_produces_more_vertices() {
        // 调用方给的容差是权威的：更小的容差必须带来更细的折线
        let build = || {
            let mut path = Path::new();
            path.move_to(Vec2::ZERO).cubic_bezier_to(
                Vec2::new(0.0, 100.0),
                Vec2::new(100.0, 100.0),
                Vec2::new(100.0, 0.0),
            );
            path
        };

        let mut coarse = build();
        coarse.flatten(1.0);
        let mut fine = build();
        fine.flatten(0.01);

        assert!(fine.polylines()[0].vertices.len() > coarse.polylines()[0].vertices.len());
    }

    #[test]
    fn test_duplicate_points_are_dropped() {
        let mut path = Path::new();
        path.move_to(Vec2::ZERO).line_to(Vec2::ZERO).line_to(Vec2::new(1.0, 0.0));
        path.trace(4);

        let polyline = &path.polylines()[0];
        assert_eq!(polyline.vertices.len(), 2);
    }

    #[test]
    fn test_resample_is_evenly_spaced() {
        let mut path = Path::new();
        path.move_to(Vec2::ZERO).line_to(Vec2::new(10.0, 0.0));
        path.trace(1);
        path.resample(1.0);

        let polyline = &path.polylines()[0];
        assert_eq!(polyline.vertices.len(), 11);
        for window in polyline.distances.windows(2) {
            assert!((window[1] - window[0] - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_point_at_interpolates_by_arc_length() {
        let mut path = Path::new();
        path.move_to(Vec2::ZERO).line_to(Vec2::new(10.0, 0.0));
        path.trace(1);

        let mid = path.point_at(0, 0.5).unwrap();
        assert!((mid - Vec2::new(5.0, 0.0)).length() < 1e-5);
    }
}
