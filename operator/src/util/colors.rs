use owo_colors::Rgb;

pub const FG1_COLOR: (u8, u8, u8) = (212, 49, 113);
pub const FG2_COLOR: (u8, u8, u8) = (70, 150, 209);
pub const FG1: Rgb = Rgb(FG1_COLOR.0, FG1_COLOR.1, FG1_COLOR.2);
pub const FG2: Rgb = Rgb(FG2_COLOR.0, FG2_COLOR.1, FG2_COLOR.2);
