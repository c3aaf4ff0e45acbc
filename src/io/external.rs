//! Command-line engines: `gdalwarp`, `gdal2tiles.py` and `gmt`.
//!
//! Each adapter builds its argument list with a pure function so the
//! command lines can be checked without the tools installed.

use crate::capability::{
    MapRenderRequest, MapRenderer, OutputBounds, ThreadHint, TilePyramid, WarpRequest, Warper,
};
use crate::types::{ProductError, ProductResult};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Run a tool to completion, turning spawn errors and non-zero exits into
/// upstream failures.
fn run_tool(capability: &str, mut command: Command) -> ProductResult<()> {
    log::debug!("Running {:?}", command);
    let output = command.output().map_err(|e| {
        ProductError::upstream(
            capability,
            format!("{:?} could not be started: {}", command.get_program(), e),
        )
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        return Err(ProductError::upstream(
            capability,
            format!(
                "{:?} exited with {}: {}",
                command.get_program(),
                output.status,
                tail.join(" | ")
            ),
        ));
    }
    Ok(())
}

/// Warp through the `gdalwarp` executable.
#[derive(Debug, Clone)]
pub struct GdalWarpCommand {
    program: String,
}

impl Default for GdalWarpCommand {
    fn default() -> Self {
        Self {
            program: "gdalwarp".to_string(),
        }
    }
}

impl GdalWarpCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Argument list for one warp.
    pub fn warp_args(input: &Path, request: &WarpRequest) -> Vec<String> {
        let threads = format!("NUM_THREADS={}", request.threads.gdal_value());
        let mut args: Vec<String> = vec![
            "-overwrite".into(),
            "-multi".into(),
            "-wo".into(),
            threads.clone(),
            "-co".into(),
            threads,
        ];
        if let Some(crs) = &request.target_crs {
            args.push("-t_srs".into());
            args.push(crs.clone());
        }
        if let Some(output_type) = request.output_type {
            args.push("-ot".into());
            args.push(output_type.gdal_name().into());
        }
        if let Some(nodata) = request.nodata {
            args.push("-srcnodata".into());
            args.push(nodata.to_string());
            args.push("-dstnodata".into());
            args.push(nodata.to_string());
        }
        // -te is xmin ymin xmax ymax in the target CRS
        match request.output_bounds {
            Some(OutputBounds::Projected(rect)) => {
                args.push("-te".into());
                for v in [rect.min_x, rect.min_y, rect.max_x, rect.max_y] {
                    args.push(v.to_string());
                }
            }
            Some(OutputBounds::Geographic(bounds)) => {
                args.push("-te".into());
                for v in [bounds.min_lon, bounds.min_lat, bounds.max_lon, bounds.max_lat] {
                    args.push(v.to_string());
                }
            }
            None => {}
        }
        args.push(path_arg(input));
        args.push(path_arg(&request.output));
        args
    }
}

impl Warper for GdalWarpCommand {
    fn warp(&self, input: &Path, request: &WarpRequest) -> ProductResult<PathBuf> {
        log::info!("Warping {} -> {}", input.display(), request.output.display());
        let mut command = Command::new(&self.program);
        command.args(Self::warp_args(input, request));
        run_tool("warper", command)?;
        if !request.output.exists() {
            return Err(ProductError::upstream(
                "warper",
                format!("{} was not written", request.output.display()),
            ));
        }
        Ok(request.output.clone())
    }
}

/// Tile pyramid through `gdal2tiles.py`.
#[derive(Debug, Clone)]
pub struct Gdal2TilesCommand {
    program: String,
}

impl Default for Gdal2TilesCommand {
    fn default() -> Self {
        Self {
            program: "gdal2tiles.py".to_string(),
        }
    }
}

impl Gdal2TilesCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Argument list: zoom range, no web viewer, process count.
    pub fn tile_args(
        raster: &Path,
        zoom: &RangeInclusive<u8>,
        out_dir: &Path,
        threads: ThreadHint,
    ) -> Vec<String> {
        vec![
            "-z".into(),
            format!("{}-{}", zoom.start(), zoom.end()),
            "-w".into(),
            "none".into(),
            format!("--processes={}", threads.resolve()),
            path_arg(raster),
            path_arg(out_dir),
        ]
    }
}

impl TilePyramid for Gdal2TilesCommand {
    fn build(
        &self,
        raster: &Path,
        zoom: RangeInclusive<u8>,
        out_dir: &Path,
        threads: ThreadHint,
    ) -> ProductResult<PathBuf> {
        log::info!(
            "Building tiles for zoom {}-{} in {}",
            zoom.start(),
            zoom.end(),
            out_dir.display()
        );
        let mut command = Command::new(&self.program);
        command.args(Self::tile_args(raster, &zoom, out_dir, threads));
        run_tool("tile pyramid", command)?;
        Ok(out_dir.to_path_buf())
    }
}

static GMT_SESSIONS: AtomicU64 = AtomicU64::new(0);

/// Basemap rendering through GMT modern mode.
#[derive(Debug, Clone)]
pub struct GmtMapRenderer {
    program: String,
}

impl Default for GmtMapRenderer {
    fn default() -> Self {
        Self {
            program: "gmt".to_string(),
        }
    }
}

impl GmtMapRenderer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The GMT module invocations for one map, in order.
    ///
    /// The figure prefix is the output path without its `.png` extension;
    /// the commands run in the output's directory.
    pub fn map_commands(request: &MapRenderRequest) -> Vec<Vec<String>> {
        let prefix = request
            .output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "map".to_string());
        let region = format!("-R{}", request.region.to_region_string());
        let projection = format!("-J{}", request.projection.spec());

        let mut commands: Vec<Vec<String>> = vec![
            vec!["begin".into(), prefix, "png".into(), format!("E{}", request.dpi)],
            vec![
                "makecpt".into(),
                format!("-C{}", request.colormap),
                format!("-T{}/{}", request.color_range.0, request.color_range.1),
            ],
            vec![
                "set".into(),
                "MAP_ANNOT_OBLIQUE".into(),
                "lat_parallel".into(),
                "MAP_FRAME_TYPE".into(),
                "plain".into(),
                "FORMAT_GEO_MAP".into(),
                "ddd.xxF".into(),
            ],
        ];

        let mut basemap = vec!["basemap".to_string(), projection, region];
        basemap.extend(request.frame.iter().map(|f| format!("-B{}", f)));
        commands.push(basemap);

        commands.push(vec![
            "grdimage".into(),
            path_arg(&request.grid),
            format!("-E{}", request.dpi),
            "-Qblack".into(),
        ]);

        for bar in &request.scale_bars {
            let font = format!("{}p,{}", request.font_size_points, bar.font_color);
            commands.push(vec![
                "basemap".into(),
                format!("-L{}", bar.placement),
                format!("--FONT_LABEL={}", font),
                format!("--FONT_ANNOT_PRIMARY={}", font),
                format!("--MAP_TICK_PEN_PRIMARY=1p,{}", bar.font_color),
            ]);
        }

        commands.push(vec!["end".into()]);
        commands
    }
}

impl MapRenderer for GmtMapRenderer {
    fn render(&self, request: &MapRenderRequest) -> ProductResult<PathBuf> {
        log::info!(
            "Rendering map {} over {}",
            request.output.display(),
            request.region.to_region_string()
        );
        let dir = request
            .output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        // Modern mode keys its session on this name; parallel scenes need
        // distinct sessions.
        let session = format!(
            "sarmap{}_{}",
            std::process::id(),
            GMT_SESSIONS.fetch_add(1, Ordering::Relaxed)
        );

        // The commands run in `dir`, so a relative grid path would dangle.
        let mut request = request.clone();
        request.grid = std::fs::canonicalize(&request.grid).map_err(|e| {
            ProductError::upstream(
                "map renderer",
                format!("grid {} is not readable: {}", request.grid.display(), e),
            )
        })?;

        for args in Self::map_commands(&request) {
            let mut command = Command::new(&self.program);
            command
                .args(&args)
                .current_dir(&dir)
                .env("GMT_SESSION_NAME", &session);
            run_tool("map renderer", command)?;
        }

        if !request.output.exists() {
            return Err(ProductError::upstream(
                "map renderer",
                format!("{} was not written", request.output.display()),
            ));
        }
        Ok(request.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{MapProjection, OutputType, ScaleBarPass};
    use crate::types::{GeographicBounds, ProjectedRect};

    #[test]
    fn test_clean_warp_args() {
        let request = WarpRequest {
            output: PathBuf::from("/work/sar_image_clean.tiff"),
            target_crs: Some("EPSG:3857".to_string()),
            output_bounds: None,
            output_type: Some(OutputType::Byte),
            nodata: Some(0.0),
            threads: ThreadHint::AllCpus,
        };
        let args = GdalWarpCommand::warp_args(Path::new("/scene/sar_image.tif"), &request);
        assert_eq!(
            args,
            vec![
                "-overwrite", "-multi", "-wo", "NUM_THREADS=ALL_CPUS", "-co",
                "NUM_THREADS=ALL_CPUS", "-t_srs", "EPSG:3857", "-ot", "Byte", "-srcnodata", "0",
                "-dstnodata", "0", "/scene/sar_image.tif", "/work/sar_image_clean.tiff",
            ]
        );
    }

    #[test]
    fn test_bounded_warp_args() {
        let geographic = WarpRequest {
            output: PathBuf::from("out.tif"),
            target_crs: None,
            output_bounds: Some(OutputBounds::Geographic(GeographicBounds {
                min_lon: -153.5,
                max_lon: -153.25,
                min_lat: 59.0,
                max_lat: 59.5,
            })),
            output_type: None,
            nodata: None,
            threads: ThreadHint::Count(3),
        };
        let args = GdalWarpCommand::warp_args(Path::new("in.vrt"), &geographic);
        assert!(args.contains(&"NUM_THREADS=3".to_string()));
        let te = args.iter().position(|a| a == "-te").unwrap();
        assert_eq!(&args[te + 1..te + 5], &["-153.5", "59", "-153.25", "59.5"]);

        let projected = WarpRequest {
            output_bounds: Some(OutputBounds::Projected(ProjectedRect {
                min_x: 80.0,
                max_y: 220.0,
                max_x: 120.0,
                min_y: 180.0,
            })),
            ..geographic
        };
        let args = GdalWarpCommand::warp_args(Path::new("in.vrt"), &projected);
        let te = args.iter().position(|a| a == "-te").unwrap();
        assert_eq!(&args[te + 1..te + 5], &["80", "180", "120", "220"]);
    }

    #[test]
    fn test_tile_args() {
        let args = Gdal2TilesCommand::tile_args(
            Path::new("clean.tiff"),
            &(10..=17),
            Path::new("mapTiles"),
            ThreadHint::Count(8),
        );
        assert_eq!(
            args,
            vec!["-z", "10-17", "-w", "none", "--processes=8", "clean.tiff", "mapTiles"]
        );
    }

    #[test]
    fn test_map_commands() {
        let request = MapRenderRequest {
            grid: PathBuf::from("/work/sar_image_cropped.tif"),
            output: PathBuf::from("/work/Augustine_orb_42_DESC.png"),
            projection: MapProjection::Mercator { width_inches: 6.0 },
            region: GeographicBounds {
                min_lon: -153.5,
                max_lon: -153.25,
                min_lat: 59.0,
                max_lat: 59.5,
            },
            frame: vec!["WSen+gblack".to_string(), "a".to_string()],
            colormap: "gray".to_string(),
            color_range: (0.0, 300.0),
            scale_bars: vec![ScaleBarPass {
                placement: "jLB+w800e+o0.212i".to_string(),
                font_color: "white".to_string(),
            }],
            font_size_points: 12,
            dpi: 300,
        };
        let commands = GmtMapRenderer::map_commands(&request);
        assert_eq!(commands[0], vec!["begin", "Augustine_orb_42_DESC", "png", "E300"]);
        assert_eq!(commands[1], vec!["makecpt", "-Cgray", "-T0/300"]);
        assert_eq!(
            commands[3],
            vec!["basemap", "-JM6i", "-R-153.5/-153.25/59/59.5", "-BWSen+gblack", "-Ba"]
        );
        assert_eq!(commands[4][0], "grdimage");
        assert_eq!(
            commands[5],
            vec![
                "basemap",
                "-LjLB+w800e+o0.212i",
                "--FONT_LABEL=12p,white",
                "--FONT_ANNOT_PRIMARY=12p,white",
                "--MAP_TICK_PEN_PRIMARY=1p,white",
            ]
        );
        assert_eq!(commands.last().unwrap(), &vec!["end".to_string()]);
    }

    #[test]
    fn test_missing_program_is_upstream_failure() {
        let warper = GdalWarpCommand::new("sarmap-no-such-gdalwarp");
        let request = WarpRequest {
            output: PathBuf::from("out.tif"),
            target_crs: None,
            output_bounds: None,
            output_type: None,
            nodata: None,
            threads: ThreadHint::AllCpus,
        };
        let err = warper.warp(Path::new("in.tif"), &request).unwrap_err();
        assert!(matches!(err, ProductError::Upstream { .. }));
    }
}
