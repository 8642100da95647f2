#![cfg(not(tarpaulin_include))]

use learnlab::color::{Cmyk, Color, ColorSpace, Hsl, Hsv, Lab, Rgb, Xyz, convert, convert_all};
use learnlab::fractal::{Palette, render_png};
use learnlab::sandbox::FractalQuery;
use std::io::{self, Write};
use std::time::Instant;

fn parse_space(name: &str) -> Option<ColorSpace> {
    match name {
        "rgb" => Some(ColorSpace::Rgb),
        "hsl" => Some(ColorSpace::Hsl),
        "hsv" => Some(ColorSpace::Hsv),
        "cmyk" => Some(ColorSpace::Cmyk),
        "xyz" => Some(ColorSpace::Xyz),
        "lab" => Some(ColorSpace::Lab),
        _ => None,
    }
}

// Parse "<space> <channels...>" or "hex <#rrggbb>"
fn parse_color(words: &[&str]) -> Result<Color, String> {
    let (space, rest) = words.split_first().ok_or("missing color")?;
    if *space == "hex" {
        let hex = rest.first().ok_or("missing hex value")?;
        return Rgb::from_hex(hex).map(Color::Rgb).map_err(|e| e.to_string());
    }

    let values: Vec<f64> = rest
        .iter()
        .map(|w| w.parse::<f64>().map_err(|_| format!("not a number: {}", w)))
        .collect::<Result<_, _>>()?;

    let expect = |n: usize| {
        if values.len() == n {
            Ok(())
        } else {
            Err(format!("{} takes {} channels", space, n))
        }
    };

    match *space {
        "rgb" => {
            expect(3)?;
            if values.iter().any(|v| !(0.0..=255.0).contains(v)) {
                return Err("rgb channels are 0-255".to_string());
            }
            Ok(Color::Rgb(Rgb::new(
                values[0].round() as u8,
                values[1].round() as u8,
                values[2].round() as u8,
            )))
        }
        "hsl" => {
            expect(3)?;
            Ok(Color::Hsl(Hsl { h: values[0], s: values[1], l: values[2] }))
        }
        "hsv" => {
            expect(3)?;
            Ok(Color::Hsv(Hsv { h: values[0], s: values[1], v: values[2] }))
        }
        "cmyk" => {
            expect(4)?;
            Ok(Color::Cmyk(Cmyk { c: values[0], m: values[1], y: values[2], k: values[3] }))
        }
        "xyz" => {
            expect(3)?;
            Ok(Color::Xyz(Xyz { x: values[0], y: values[1], z: values[2] }))
        }
        "lab" => {
            expect(3)?;
            Ok(Color::Lab(Lab { l: values[0], a: values[1], b: values[2] }))
        }
        other => Err(format!("unknown color space: {}", other)),
    }
}

fn run_convert(args: &[&str]) -> Result<(), String> {
    // convert <color...> [to <space>]
    let (color_words, target) = match args.iter().position(|w| *w == "to") {
        Some(pos) => {
            let target = args
                .get(pos + 1)
                .and_then(|s| parse_space(s))
                .ok_or("unknown target space")?;
            (&args[..pos], Some(target))
        }
        None => (args, None),
    };

    let color = parse_color(color_words)?;
    match target {
        Some(target) => {
            let converted = convert(color, target).map_err(|e| e.to_string())?;
            println!("{:?}", converted);
        }
        None => {
            let report = convert_all(color).map_err(|e| e.to_string())?;
            println!("  hex   {}", report.hex);
            println!("  rgb   {} {} {}", report.rgb.r, report.rgb.g, report.rgb.b);
            println!("  hsl   {:.1} {:.1} {:.1}", report.hsl.h, report.hsl.s, report.hsl.l);
            println!("  hsv   {:.1} {:.1} {:.1}", report.hsv.h, report.hsv.s, report.hsv.v);
            println!(
                "  cmyk  {:.1} {:.1} {:.1} {:.1}",
                report.cmyk.c, report.cmyk.m, report.cmyk.y, report.cmyk.k
            );
            println!("  xyz   {:.3} {:.3} {:.3}", report.xyz.x, report.xyz.y, report.xyz.z);
            println!("  lab   {:.3} {:.3} {:.3}", report.lab.l, report.lab.a, report.lab.b);
        }
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("invalid value for {}: {}", key, value))
}

fn run_render(args: &[&str]) -> Result<(), String> {
    // render <file.png> [key=value ...]
    let (path, options) = args.split_first().ok_or("missing output file")?;
    let mut query = FractalQuery::default();

    for option in options {
        let (key, value) = option
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got {}", option))?;
        match key {
            "kind" => query.kind = Some(value.to_string()),
            "width" => query.width = Some(parse_number(key, value)?),
            "height" => query.height = Some(parse_number(key, value)?),
            "iter" | "max_iterations" => query.max_iterations = Some(parse_number(key, value)?),
            "zoom" => query.zoom = Some(parse_number(key, value)?),
            "x" | "center_x" => query.center_x = Some(parse_number(key, value)?),
            "y" | "center_y" => query.center_y = Some(parse_number(key, value)?),
            "c_re" => query.c_re = Some(parse_number(key, value)?),
            "c_im" => query.c_im = Some(parse_number(key, value)?),
            "depth" => query.depth = Some(parse_number(key, value)?),
            "points" => query.points = Some(parse_number(key, value)?),
            "seed" => query.seed = Some(parse_number(key, value)?),
            "palette" => {
                query.palette = Some(match value {
                    "grayscale" => Palette::Grayscale,
                    "fire" => Palette::Fire,
                    "rainbow" => Palette::Rainbow,
                    _ => return Err(format!("unknown palette: {}", value)),
                })
            }
            _ => return Err(format!("unknown option: {}", key)),
        }
    }

    let request = query.into_request().map_err(|e| e.to_string())?;
    let png = render_png(&request).map_err(|e| e.to_string())?;
    std::fs::write(path, &png).map_err(|e| e.to_string())?;
    println!("wrote {} ({} bytes)", path, png.len());
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut start_time = Instant::now();
    let mut status = String::from("ok");

    loop {
        let elapsed_time = start_time.elapsed().as_secs_f64();
        print!("[{:.1}] ({}) > ", elapsed_time, status);
        io::stdout().flush()?;

        let mut command = String::new();
        if io::stdin().read_line(&mut command)? == 0 {
            break;
        }
        let words: Vec<&str> = command.split_whitespace().collect();
        start_time = Instant::now();

        let Some((name, args)) = words.split_first() else {
            status = String::from("invalid command");
            continue;
        };

        let result = match *name {
            "q" => break,
            "help" => {
                println!("Commands:");
                println!("  q: Quit");
                println!("  convert <space> <channels...> [to <space>]: Convert a color");
                println!("      spaces: rgb hsl hsv cmyk xyz lab, or hex <#rrggbb>");
                println!("  render <file.png> [key=value ...]: Render a fractal");
                println!("      kind=mandelbrot|julia|sierpinski|koch|fern width height iter");
                println!("      zoom x y c_re c_im depth points seed palette=grayscale|fire|rainbow");
                Ok(())
            }
            "convert" => run_convert(args),
            "render" => run_render(args),
            _ => Err(String::from("invalid command")),
        };

        status = match result {
            Ok(()) => String::from("ok"),
            Err(e) => e,
        };
    }

    Ok(())
}
