use clap::{ App, Arg, ArgMatches };
use env_logger::Env;
use log::{ error, info };

use std::error::Error;
use std::process;
use std::str::FromStr;

use lpr_ensemble::config::{ Config, PLATE_ALLOWLIST };
use lpr_ensemble::tf::{ TfDetector, TfRecognizer };
use lpr_ensemble::{ load_image, Annotator, Lpr };


fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let matches = App::new("LPR")
                    .version("0.1.0")
                    .author("kingrong")
                    .about("Finds license plates in a still image and reads them by OCR vote")
                    .arg(Arg::with_name("INPUT")
                        .help("image file with license plate")
                        .required(true)
                        .index(1))
                    .arg(Arg::with_name("detector")
                        .long("detector")
                        .takes_value(true)
                        .default_value("./models/detect.pb")
                        .help("frozen plate detection graph"))
                    .arg(Arg::with_name("recognizer")
                        .long("recognizer")
                        .takes_value(true)
                        .default_value("./models/ocr.pb")
                        .help("frozen text recognition graph"))
                    .arg(Arg::with_name("charset")
                        .long("charset")
                        .takes_value(true)
                        .default_value(PLATE_ALLOWLIST)
                        .help("characters of the recognizer output classes, blank excluded"))
                    .arg(Arg::with_name("ocr-size")
                        .long("ocr-size")
                        .takes_value(true)
                        .default_value("164x48")
                        .help("recognizer input as WIDTHxHEIGHT"))
                    .arg(Arg::with_name("transposed")
                        .long("transposed")
                        .help("recognizer graph expects a transposed image"))
                    .arg(Arg::with_name("output")
                        .short("o")
                        .long("output")
                        .takes_value(true)
                        .default_value("./output")
                        .help("directory for the result images"))
                    .arg(Arg::with_name("font")
                        .long("font")
                        .takes_value(true)
                        .help("TrueType font for box labels"))
                    .arg(Arg::with_name("confidence")
                        .long("confidence")
                        .takes_value(true)
                        .help("detection confidence floor for the multi-scale passes"))
                    .arg(Arg::with_name("fallback-confidence")
                        .long("fallback-confidence")
                        .takes_value(true)
                        .help("confidence for the unscaled fallback pass"))
                    .arg(Arg::with_name("scales")
                        .long("scales")
                        .takes_value(true)
                        .help("comma separated scale factors, e.g. 1.0,1.5,2.0"))
                    .arg(Arg::with_name("margin")
                        .long("margin")
                        .takes_value(true)
                        .help("pixels added around each plate before cropping"))
                    .arg(Arg::with_name("min-height")
                        .long("min-height")
                        .takes_value(true)
                        .help("crops shorter than this are upscaled before OCR"))
                    .arg(Arg::with_name("debug")
                        .long("debug")
                        .help("also write crops, the enhanced frame and OCR variants"))
                    .arg(Arg::with_name("no-heatmap")
                        .long("no-heatmap")
                        .help("skip the confidence heatmap"))
                    .arg(Arg::with_name("no-enhance")
                        .long("no-enhance")
                        .help("detect on the raw image"))
                    .get_matches();

    if let Err(e) = run(&matches) {
        error!("{}", e);
        eprintln!("lpr: {}", e);
        process::exit(1);
    }
}

fn run(matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let config = config_from(matches)?;
    let file_name = matches.value_of("INPUT").ok_or("image is required")?;

    let detector = TfDetector::open(matches.value_of("detector").ok_or("detector is required")?)?;
    let (width, height) = parse_size(matches.value_of("ocr-size").unwrap_or("164x48"))?;
    let recognizer = TfRecognizer::new(
        matches.value_of("recognizer").ok_or("recognizer is required")?,
        "input_1",
        "dense_2/truediv",
        matches.value_of("charset").unwrap_or(PLATE_ALLOWLIST),
        (width, height),
        matches.is_present("transposed"),
    )?;
    let img = load_image(file_name)?;

    let mut lpr = Lpr::new(&detector, &recognizer, config)?;
    if let Some(font) = matches.value_of("font") {
        lpr = lpr.with_annotator(Annotator::with_font_file(font)?);
    }

    let report = lpr.recognize(&img)?;
    let output = matches.value_of("output").unwrap_or("./output");
    let written = report.save(output, lpr.config().debug_artifacts)?;

    if report.has_detections() {
        info!("{} plate(s): {}", report.plates.len(), report.texts().join(", "));
    } else {
        info!("no detections");
    }
    info!("result saved to {}", written.first().map(|p| p.display().to_string()).unwrap_or_default());
    Ok(())
}

fn config_from(matches: &ArgMatches) -> Result<Config, Box<dyn Error>> {
    let mut config = Config::default();
    if let Some(v) = parse_opt(matches, "confidence")? {
        config.detection.confidence = v;
    }
    if let Some(v) = parse_opt(matches, "fallback-confidence")? {
        config.detection.fallback_confidence = v;
    }
    if let Some(v) = parse_opt(matches, "margin")? {
        config.detection.crop_margin = v;
    }
    if let Some(v) = parse_opt(matches, "min-height")? {
        config.ocr.min_height = v;
    }
    if let Some(scales) = matches.value_of("scales") {
        config.detection.scales = scales
            .split(',')
            .map(|s| s.trim().parse::<f32>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("bad --scales {:?}: {}", scales, e))?;
    }
    config.debug_artifacts = matches.is_present("debug");
    config.heatmap.enabled = !matches.is_present("no-heatmap");
    config.enhance.enabled = !matches.is_present("no-enhance");
    config.validate()?;
    Ok(config)
}

fn parse_opt<T>(matches: &ArgMatches, name: &str) -> Result<Option<T>, Box<dyn Error>>
where T: FromStr,
      T::Err: std::fmt::Display,
{
    match matches.value_of(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("bad --{} {:?}: {}", name, raw, e).into()),
        None => Ok(None),
    }
}

fn parse_size(raw: &str) -> Result<(u32, u32), Box<dyn Error>> {
    let mut parts = raw.split('x');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(w), Some(h), None) => Ok((w.trim().parse()?, h.trim().parse()?)),
        _ => Err(format!("size {:?} is not WIDTHxHEIGHT", raw).into()),
    }
}
