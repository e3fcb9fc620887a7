// THEORY:
// The `colormap` module turns a scalar saliency value into a color and blends
// that color over an original pixel. It is the only place that knows what the
// overlay looks like.
//
// The scale is the classic "jet" diverging ramp: 0.0 is deep blue, values pass
// through cyan, green and yellow, and 1.0 is deep red. Each channel is a clamped
// triangle over the value, which is cheap enough to evaluate once per pixel with
// no lookup table.

use image::Rgb;

/// Maps `value` in [0, 1] to a blue -> cyan -> yellow -> red color.
pub fn jet(value: f32) -> Rgb<u8> {
    let v = value.clamp(0.0, 1.0);
    let channel = |center: f32| -> u8 {
        let intensity = (1.5 - (4.0 * v - center).abs()).clamp(0.0, 1.0);
        (intensity * 255.0).round() as u8
    };
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// Alpha-blends `overlay` over `base`: `alpha` = 0 keeps the base, 1 replaces it.
pub fn blend(base: Rgb<u8>, overlay: Rgb<u8>, alpha: f32) -> Rgb<u8> {
    let alpha = alpha.clamp(0.0, 1.0);
    let mix = |b: u8, o: u8| -> u8 {
        (f32::from(b) * (1.0 - alpha) + f32::from(o) * alpha)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    Rgb([
        mix(base[0], overlay[0]),
        mix(base[1], overlay[1]),
        mix(base[2], overlay[2]),
    ])
}
