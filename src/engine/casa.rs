// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Drive a toolkit installation as a child process.
//!
//! Each request is written as a small task script; the parameters are embedded
//! as JSON and the task's return value is written back as JSON next to the
//! script. Image copies and removals don't need the toolkit; images are
//! directories and are handled natively.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    process::Command,
};

use crossbeam_utils::atomic::AtomicCell;
use log::{debug, trace};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;

use super::*;

fn default_casa() -> PathBuf {
    PathBuf::from("casa")
}

fn default_workdir() -> PathBuf {
    PathBuf::from(".")
}

/// How to reach the toolkit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// The toolkit executable.
    #[serde(default = "default_casa")]
    pub casa: PathBuf,

    /// Where task scripts are run and images are written.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,

    /// Extra arguments given to the executable before the script.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            casa: default_casa(),
            workdir: default_workdir(),
            extra_args: vec![],
        }
    }
}

pub struct CasaProcessEngine {
    config: EngineConfig,

    /// Distinguishes the scripts of concurrent requests.
    counter: AtomicCell<usize>,
}

const TCLEAN_BODY: &str = r#"
r = tclean(**args)
r = r if isinstance(r, dict) else {}
ret = {
    'stopcode': int(r.get('stopcode', 0)),
    'stopreason': r.get('stopreason'),
    'iterdone': int(r.get('iterdone', 0)),
    'nmajordone': int(r.get('nmajordone', 0)),
    'peak_residuals': [float(x) for x in r.get('summaryminor', {}).get('peakRes', [])] if isinstance(r.get('summaryminor'), dict) else [],
    'model_flux': [float(x) for x in r.get('summaryminor', {}).get('modelFlux', [])] if isinstance(r.get('summaryminor'), dict) else [],
}
"#;

const SENSITIVITY_BODY: &str = r#"
sel = str(args['spw']) if not args['chansel'] else '%d:%s' % (args['spw'], args['chansel'])
im.open(args['vis'])
im.selectvis(field=args['field'], spw=sel, intent=args['intent'])
im.defineimage(mode='cube' if args['specmode'] == 'cube' else 'mfs', nx=args['imsize'][0], ny=args['imsize'][1], cellx=args['cell'][0], celly=args['cell'][-1])
im.weight(type='briggs' if args['weighting'].startswith('briggs') else args['weighting'], robust=args['robust'])
if args['uvtaper']:
    im.filter(type='gaussian', bmaj=args['uvtaper'][0], bmin=args['uvtaper'][-1], bpa='0deg')
r = im.apparentsens()
im.close()
msmd.open(args['vis'])
bw = float(msmd.bandwidths(args['spw']))
msmd.close()
ret = {'sensitivity_jy': float(r[1]), 'bandwidth_hz': bw}
"#;

const STATISTICS_BODY: &str = r#"
s = imstat(imagename=args['image'], mask=args['mask'] or '', chans=args['chans'] or '')
if not s or len(s.get('npts', [])) == 0 or s['npts'][0] == 0:
    ret = None
else:
    p = imstat(imagename=args['image'], mask=args['mask'] or '', chans=args['chans'] or '', axes=[0, 1, 2])
    prms = [float(x) for x in p['rms']] if p and len(p.get('rms', [])) > 0 else [float(s['rms'][0])]
    ret = {
        'max': float(s['max'][0]), 'min': float(s['min'][0]), 'rms': float(s['rms'][0]),
        'median': float(s['median'][0]), 'medabsdevmed': float(s['medabsdevmed'][0]),
        'sum': float(s['sum'][0]), 'npts': int(s['npts'][0]),
        'plane_rms_min': min(prms), 'plane_rms_max': max(prms),
    }
"#;

const SHAPE_BODY: &str = r#"
ia.open(args['image'])
shp = list(ia.shape())
ia.close()
ret = {'nx': int(shp[0]), 'ny': int(shp[1]), 'nstokes': int(shp[2]) if len(shp) > 2 else 1, 'nchan': int(shp[3]) if len(shp) > 3 else 1}
"#;

const BEAM_BODY: &str = r#"
ia.open(args['image'])
rb = ia.restoringbeam()
ia.close()
def conv(b):
    return {
        'major': qa.convert(b['major'], 'arcsec')['value'],
        'minor': qa.convert(b['minor'], 'arcsec')['value'],
        'pa': qa.convert(b['positionangle'], 'deg')['value'],
    }
if 'beams' in rb:
    ret = [conv(b['*0']) for _, b in sorted(rb['beams'].items(), key=lambda kv: int(kv[0][1:]))]
elif rb:
    ret = [conv(rb)]
else:
    ret = []
"#;

const PB_EDGE_BODY: &str = r#"
import numpy as np
ia.open(args['image'])
a = ia.getchunk()
ia.close()
a = a.reshape(a.shape[0], a.shape[1], -1)[:, :, 0]
nx, ny = a.shape
ret = float(np.mean([a[0, ny // 2], a[nx - 1, ny // 2], a[nx // 2, 0], a[nx // 2, ny - 1]]))
"#;

const PB_MASK_BODY: &str = r#"
immath(imagename=[args['pb']], expr='iif(IM0 > %f, 1.0, 0.0)' % args['pblimit'], outfile=args['mask'])
ret = True
"#;

const BOX_MASK_BODY: &str = r#"
region = 'box[[%dpix, %dpix], [%dpix, %dpix]]' % (args['blc'][0], args['blc'][1], args['trc'][0], args['trc'][1])
makemask(mode='copy', inpimage=args['template'], inpmask=region, output=args['mask'], overwrite=True)
ret = True
"#;

const CIRCLE_MASK_BODY: &str = r#"
region = 'circle[[%fpix, %fpix], %fpix]' % (args['centre'][0], args['centre'][1], args['radius'])
makemask(mode='copy', inpimage=args['template'], inpmask=region, output=args['mask'], overwrite=True)
ret = True
"#;

const REGRID_BODY: &str = r#"
imregrid(imagename=args['mask'], template=args['template'], output=args['output'], interpolation='nearest', overwrite=True)
ret = True
"#;

const COMBINE_BODY: &str = r#"
makemask(mode='copy', inpimage=args['template'], inpmask=args['masks'], output=args['output'], overwrite=True)
ret = True
"#;

const MOMENTS_BODY: &str = r#"
immoments(imagename=args['image'], moments=[args['moment']], chans=args['chans'] or '', outfile=args['output'])
ret = True
"#;

/// Write a task script. `body` must bind the task's return value to `ret`.
fn render_script(body: &str, args: &serde_json::Value, ret_path: &Path) -> String {
    format!(
        "import json\nargs = json.loads(r'''{}''')\n{}\nwith open(r'''{}''', 'w') as fh:\n    json.dump(ret, fh)\n",
        args,
        body.trim(),
        ret_path.display()
    )
}

fn copy_dir_all(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &to.join(entry.file_name()))?;
        } else {
            fs::copy(entry.path(), to.join(entry.file_name()))?;
        }
    }
    Ok(())
}

impl CasaProcessEngine {
    pub fn new(config: EngineConfig) -> CasaProcessEngine {
        CasaProcessEngine {
            config,
            counter: AtomicCell::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn path(&self, image: &str) -> PathBuf {
        self.config.workdir.join(image)
    }

    fn run_task<T: DeserializeOwned>(
        &self,
        task: &str,
        body: &str,
        args: serde_json::Value,
    ) -> Result<T, EngineError> {
        let n = self.counter.fetch_add(1);
        let stem = format!("pipeline_imaging_{}_{n}_{task}", std::process::id());
        let script = self.config.workdir.join(format!("{stem}.py"));
        let ret_path = self.config.workdir.join(format!("{stem}.json"));
        {
            let mut f = fs::File::create(&script)?;
            f.write_all(render_script(body, &args, &ret_path).as_bytes())?;
        }
        scopeguard::defer! {
            let _ = fs::remove_file(&script);
            let _ = fs::remove_file(&ret_path);
        }
        debug!("Running toolkit task '{task}' via {}", script.display());
        trace!("{args}");

        let output = Command::new(&self.config.casa)
            .args(["--nologger", "--nogui", "--agg"])
            .args(&self.config.extra_args)
            .arg("-c")
            .arg(&script)
            .current_dir(&self.config.workdir)
            .output()
            .map_err(|err| EngineError::Spawn {
                exe: self.config.casa.clone(),
                err,
            })?;

        if !output.status.success() {
            return Err(EngineError::TaskFailed {
                task: task.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        let contents = fs::read_to_string(&ret_path).map_err(|_| EngineError::NoReturn {
            task: task.to_string(),
        })?;
        Ok(serde_json::from_str(&contents)?)
    }
}

impl DeconvolutionEngine for CasaProcessEngine {
    fn tclean(&self, params: &TcleanParams) -> Result<TcleanReturn, EngineError> {
        self.run_task("tclean", TCLEAN_BODY, serde_json::to_value(params)?)
    }

    fn apparent_sensitivity(
        &self,
        request: &SensitivityRequest,
    ) -> Result<ApparentSensitivity, EngineError> {
        self.run_task(
            "apparentsens",
            SENSITIVITY_BODY,
            serde_json::to_value(request)?,
        )
    }
}

impl ImageTool for CasaProcessEngine {
    fn exists(&self, image: &str) -> bool {
        self.path(image).exists()
    }

    fn shape(&self, image: &str) -> Result<ImageShape, EngineError> {
        if !self.exists(image) {
            return Err(EngineError::NoSuchImage(image.to_string()));
        }
        self.run_task("shape", SHAPE_BODY, json!({ "image": image }))
    }

    fn restoring_beam(&self, image: &str) -> Result<Vec<Beam>, EngineError> {
        if !self.exists(image) {
            return Err(EngineError::NoSuchImage(image.to_string()));
        }
        self.run_task("restoringbeam", BEAM_BODY, json!({ "image": image }))
    }

    fn statistics(
        &self,
        image: &str,
        region: &StatsRegion,
    ) -> Result<Option<ImageStats>, EngineError> {
        if !self.exists(image) {
            return Err(EngineError::NoSuchImage(image.to_string()));
        }
        self.run_task(
            "imstat",
            STATISTICS_BODY,
            json!({ "image": image, "mask": region.to_lel(), "chans": region.chans }),
        )
    }

    fn pb_edge_response(&self, pb: &str) -> Result<f64, EngineError> {
        if !self.exists(pb) {
            return Err(EngineError::NoSuchImage(pb.to_string()));
        }
        self.run_task("pbedge", PB_EDGE_BODY, json!({ "image": pb }))
    }

    fn copy_image(&self, from: &str, to: &str) -> Result<(), EngineError> {
        let from_path = self.path(from);
        let to_path = self.path(to);
        if !from_path.exists() {
            return Err(EngineError::NoSuchImage(from.to_string()));
        }
        self.remove_image(to)?;
        trace!("Copying {} to {}", from_path.display(), to_path.display());
        if from_path.is_dir() {
            copy_dir_all(&from_path, &to_path)?;
        } else {
            fs::copy(&from_path, &to_path)?;
        }
        Ok(())
    }

    fn remove_image(&self, image: &str) -> Result<(), EngineError> {
        let path = self.path(image);
        if path.is_dir() {
            fs::remove_dir_all(path)?;
        } else if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn make_pb_mask(&self, pb: &str, mask: &str, pblimit: f64) -> Result<(), EngineError> {
        self.run_task::<bool>(
            "pbmask",
            PB_MASK_BODY,
            json!({ "pb": pb, "mask": mask, "pblimit": pblimit }),
        )?;
        Ok(())
    }

    fn make_box_mask(
        &self,
        template: &str,
        mask: &str,
        blc: [usize; 2],
        trc: [usize; 2],
    ) -> Result<(), EngineError> {
        self.run_task::<bool>(
            "boxmask",
            BOX_MASK_BODY,
            json!({ "template": template, "mask": mask, "blc": blc, "trc": trc }),
        )?;
        Ok(())
    }

    fn make_circle_mask(
        &self,
        template: &str,
        mask: &str,
        centre: [f64; 2],
        radius: f64,
    ) -> Result<(), EngineError> {
        self.run_task::<bool>(
            "circlemask",
            CIRCLE_MASK_BODY,
            json!({ "template": template, "mask": mask, "centre": centre, "radius": radius }),
        )?;
        Ok(())
    }

    fn regrid_mask(&self, mask: &str, template: &str, output: &str) -> Result<(), EngineError> {
        self.run_task::<bool>(
            "imregrid",
            REGRID_BODY,
            json!({ "mask": mask, "template": template, "output": output }),
        )?;
        Ok(())
    }

    fn combine_masks(
        &self,
        masks: &[String],
        template: &str,
        output: &str,
    ) -> Result<(), EngineError> {
        self.run_task::<bool>(
            "combinemasks",
            COMBINE_BODY,
            json!({ "masks": masks, "template": template, "output": output }),
        )?;
        Ok(())
    }

    fn moments(
        &self,
        image: &str,
        moment: Moment,
        chans: Option<&str>,
        output: &str,
    ) -> Result<(), EngineError> {
        self.run_task::<bool>(
            "immoments",
            MOMENTS_BODY,
            json!({ "image": image, "moment": moment.index(), "chans": chans, "output": output }),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn engine_in(dir: &Path) -> CasaProcessEngine {
        CasaProcessEngine::new(EngineConfig {
            casa: PathBuf::from("/nonexistent/casa"),
            workdir: dir.to_path_buf(),
            extra_args: vec![],
        })
    }

    #[test]
    fn test_script_embeds_parameters() {
        let params = TcleanParams {
            vis: vec!["uid___A002.ms".to_string()],
            imagename: "img.I.iter1".to_string(),
            niter: 100,
            ..Default::default()
        };
        let script = render_script(
            TCLEAN_BODY,
            &serde_json::to_value(&params).unwrap(),
            Path::new("/tmp/ret.json"),
        );
        assert!(script.starts_with("import json\nargs = json.loads(r'''{"));
        assert!(script.contains(r#""imagename":"img.I.iter1""#));
        assert!(script.contains(r#""niter":100"#));
        assert!(script.contains("r = tclean(**args)"));
        assert!(script.ends_with("json.dump(ret, fh)\n"));
    }

    #[test]
    fn test_native_copy_and_remove() {
        let tmp = TempDir::new().expect("couldn't make tmp dir");
        let engine = engine_in(tmp.path());

        let image = tmp.path().join("a.image");
        fs::create_dir_all(image.join("logtable")).unwrap();
        fs::write(image.join("table.dat"), b"pixels").unwrap();
        fs::write(image.join("logtable").join("table.f0"), b"log").unwrap();

        assert!(engine.exists("a.image"));
        assert!(!engine.exists("b.image"));
        engine.copy_image("a.image", "b.image").unwrap();
        assert!(engine.exists("b.image"));
        assert_eq!(
            fs::read(tmp.path().join("b.image").join("logtable").join("table.f0")).unwrap(),
            b"log"
        );

        // Copying over an existing image replaces it.
        fs::write(image.join("table.dat"), b"new pixels").unwrap();
        engine.copy_image("a.image", "b.image").unwrap();
        assert_eq!(
            fs::read(tmp.path().join("b.image").join("table.dat")).unwrap(),
            b"new pixels"
        );

        engine.remove_image("b.image").unwrap();
        assert!(!engine.exists("b.image"));
        // Removing something that isn't there is fine.
        engine.remove_image("b.image").unwrap();

        let result = engine.copy_image("c.image", "d.image");
        assert!(matches!(result, Err(EngineError::NoSuchImage(_))));
    }

    #[test]
    fn test_missing_executable_is_a_spawn_error() {
        let tmp = TempDir::new().expect("couldn't make tmp dir");
        let engine = engine_in(tmp.path());
        let result = engine.tclean(&TcleanParams::default());
        assert!(matches!(result, Err(EngineError::Spawn { .. })));
        // No task scripts are left behind.
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);

        let result = engine.shape("nothing.image");
        assert!(matches!(result, Err(EngineError::NoSuchImage(_))));
    }
}
