// easy-probe/Crates/easy-probe/src/dataset.rs

//! The on-disk layout of a baked dataset.
//!
//! A dataset is four files in one directory:
//!
//! * `EasyProbeMetadata.byte`: a single [DatasetMetadata] record.
//!
//! * `EasyProbeL0L1.byte`: the [ShComponent::Ar], [ShComponent::Ag], and
//!   [ShComponent::Ab] groups of every probe, one component after another.
//!
//! * `EasyProbeL2.byte`: likewise for [ShComponent::Br], [ShComponent::Bg],
//!   [ShComponent::Bb], and [ShComponent::C].
//!
//! * `EasyProbeCell.byte`: one [CellRecord] per cell.
//!
//! Probes and cells are stored in scan order (by z, then y, then x). Since the
//! probes form a dense box, a probe's index follows directly from its grid
//! coordinate, and a row of probes along x is a contiguous run of each
//! component. All values use the native byte order.

use crate::grid::{scan_order_key, GridSettings, ProbeGrid};
use crate::SH_COEFFICIENT_COUNT;
use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use glam::{IVec3, Vec4};
use half::f16;
use log::info;
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error as Thiserror;

pub const METADATA_FILE_NAME: &str = "EasyProbeMetadata.byte";
pub const L0L1_FILE_NAME: &str = "EasyProbeL0L1.byte";
pub const L2_FILE_NAME: &str = "EasyProbeL2.byte";
pub const CELL_FILE_NAME: &str = "EasyProbeCell.byte";

/// Size of one packed group: four half floats.
pub const BYTES_PER_GROUP: usize = 8;

/// One 4-wide half-float group of a probe's packed coefficients.
///
/// Each component is stored as its own contiguous array covering every probe,
/// and is uploaded into its own volume at runtime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ShComponent {
    /// L1 red coefficients in xyz, L0 red in w.
    Ar,
    Ag,
    Ab,
    /// The first four L2 red coefficients.
    Br,
    Bg,
    Bb,
    /// The fifth L2 coefficient of red, green, and blue, and 1 in w.
    C,
}

/// Global facts about a dataset, stored as twelve 32-bit integers.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct DatasetMetadata {
    /// The minimum corner of the box enclosing every cell.
    pub cell_min: IVec3,
    pub probe_spacing: i32,
    /// The maximum corner of the box enclosing every cell.
    pub cell_max: IVec3,
    pub cell_size: i32,
    /// The number of probes along each axis of the whole dataset.
    pub probe_count_per_volume_axis: IVec3,
    /// The number of probes along one axis of a single cell.
    pub probe_count_per_cell_axis: i32,
}

/// The per-cell index record.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct CellRecord {
    /// The cell center in xyz, and the number of probes in a dataset slice in
    /// w.
    pub position: Vec4,
    /// The cell's grid coordinate relative to [DatasetMetadata::cell_min] in
    /// xyz, and its index in the flattened cell grid in w.
    pub cell_index: Vec4,
}

/// The errors that can occur while writing or reading a dataset.
#[derive(Thiserror, Debug)]
pub enum DatasetError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("The metadata record is {actual} bytes long, but {expected} were expected")]
    MetadataSize { expected: usize, actual: usize },
    #[error("The metadata record is malformed: {0}")]
    InvalidMetadata(&'static str),
    #[error(
        "The probes don't form a dense grid: {actual} probes were placed, but the cell bounds \
imply {expected}"
    )]
    ProbeCountMismatch { expected: usize, actual: usize },
    #[error("There are no cells to write")]
    EmptyGrid,
    #[error("Probe {index} is out of range; the dataset has {count} probes")]
    ProbeOutOfRange { index: usize, count: usize },
}

/// Writes baked grids into a dataset directory.
pub struct DatasetWriter {
    dir: PathBuf,
}

/// Reads back a dataset written by [DatasetWriter].
pub struct DatasetReader {
    dir: PathBuf,
    metadata: DatasetMetadata,
}

impl ShComponent {
    pub const ALL: [ShComponent; 7] = [
        ShComponent::Ar,
        ShComponent::Ag,
        ShComponent::Ab,
        ShComponent::Br,
        ShComponent::Bg,
        ShComponent::Bb,
        ShComponent::C,
    ];
    pub const L0L1: [ShComponent; 3] = [ShComponent::Ar, ShComponent::Ag, ShComponent::Ab];

    pub fn file_name(self) -> &'static str {
        match self {
            ShComponent::Ar | ShComponent::Ag | ShComponent::Ab => L0L1_FILE_NAME,
            _ => L2_FILE_NAME,
        }
    }

    /// The position of this component's array within its file.
    pub fn index_in_file(self) -> usize {
        match self {
            ShComponent::Ar | ShComponent::Br => 0,
            ShComponent::Ag | ShComponent::Bg => 1,
            ShComponent::Ab | ShComponent::Bb => 2,
            ShComponent::C => 3,
        }
    }

    /// The shader-visible name of the volume holding this component.
    pub fn texture_name(self) -> &'static str {
        match self {
            ShComponent::Ar => "_EasyProbeSHAr",
            ShComponent::Ag => "_EasyProbeSHAg",
            ShComponent::Ab => "_EasyProbeSHAb",
            ShComponent::Br => "_EasyProbeSHBr",
            ShComponent::Bg => "_EasyProbeSHBg",
            ShComponent::Bb => "_EasyProbeSHBb",
            ShComponent::C => "_EasyProbeSHC",
        }
    }

    fn slot(self) -> usize {
        ShComponent::ALL
            .iter()
            .position(|&component| component == self)
            .unwrap_or_default()
    }
}

/// Packs a probe's 27 coefficients into the seven half-float groups, in
/// [ShComponent::ALL] order.
pub fn pack_probe(coefficients: &[f32; SH_COEFFICIENT_COUNT]) -> [[f16; 4]; 7] {
    let c = |index: usize| f16::from_f32(coefficients[index]);
    let mut groups = [[f16::ZERO; 4]; 7];
    for channel in 0..3 {
        groups[channel] = [c(3 + channel), c(6 + channel), c(9 + channel), c(channel)];
        groups[3 + channel] = [
            c(12 + channel),
            c(15 + channel),
            c(18 + channel),
            c(21 + channel),
        ];
    }
    groups[6] = [c(24), c(25), c(26), f16::ONE];
    groups
}

/// Reverses [pack_probe].
pub fn unpack_probe(groups: &[[f16; 4]; 7]) -> [f32; SH_COEFFICIENT_COUNT] {
    let mut coefficients = [0.0; SH_COEFFICIENT_COUNT];
    for channel in 0..3 {
        let [x, y, z, w] = groups[channel];
        coefficients[3 + channel] = x.to_f32();
        coefficients[6 + channel] = y.to_f32();
        coefficients[9 + channel] = z.to_f32();
        coefficients[channel] = w.to_f32();

        for (band, value) in groups[3 + channel].iter().enumerate() {
            coefficients[12 + band * 3 + channel] = value.to_f32();
        }
        coefficients[24 + channel] = groups[6][channel].to_f32();
    }
    coefficients
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> DatasetError + '_ {
    move |source| DatasetError::Io {
        path: path.to_owned(),
        source,
    }
}

impl DatasetMetadata {
    pub const ENCODED_SIZE: usize = 12 * 4;

    /// Computes the metadata of a placed grid, checking that the probes fill
    /// the cell bounds densely.
    pub fn from_grid(grid: &ProbeGrid, settings: &GridSettings) -> Result<Self, DatasetError> {
        let settings = &settings.normalized();
        let (cell_min, cell_max) = grid.cell_bounds().ok_or(DatasetError::EmptyGrid)?;
        let probe_count_per_cell_axis = settings.probes_per_cell_axis();
        let cell_count_per_axis = (cell_max - cell_min) / settings.cell_size;
        let probe_count_per_volume_axis =
            cell_count_per_axis * (probe_count_per_cell_axis - 1) + IVec3::ONE;
        debug_assert_eq!(
            probe_count_per_volume_axis,
            (cell_max - cell_min) / settings.probe_spacing + IVec3::ONE
        );

        let metadata = DatasetMetadata {
            cell_min,
            probe_spacing: settings.probe_spacing,
            cell_max,
            cell_size: settings.cell_size,
            probe_count_per_volume_axis,
            probe_count_per_cell_axis,
        };

        let expected = metadata.total_probe_count();
        if expected != grid.probes.len() {
            return Err(DatasetError::ProbeCountMismatch {
                expected,
                actual: grid.probes.len(),
            });
        }
        Ok(metadata)
    }

    pub fn total_probe_count(&self) -> usize {
        let count = self.probe_count_per_volume_axis.max(IVec3::ZERO).as_uvec3();
        count.x as usize * count.y as usize * count.z as usize
    }

    pub fn probe_count_per_slice(&self) -> i32 {
        self.probe_count_per_volume_axis.x * self.probe_count_per_volume_axis.y
    }

    pub fn cell_count_per_axis(&self) -> IVec3 {
        (self.cell_max - self.cell_min) / self.cell_size
    }

    /// The byte length of a single component array.
    pub fn component_byte_len(&self) -> u64 {
        (self.total_probe_count() * BYTES_PER_GROUP) as u64
    }

    /// The byte offset of a component array within its file.
    pub fn component_file_offset(&self, component: ShComponent) -> u64 {
        component.index_in_file() as u64 * self.component_byte_len()
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_ivec3(writer, self.cell_min)?;
        writer.write_i32::<NativeEndian>(self.probe_spacing)?;
        write_ivec3(writer, self.cell_max)?;
        writer.write_i32::<NativeEndian>(self.cell_size)?;
        write_ivec3(writer, self.probe_count_per_volume_axis)?;
        writer.write_i32::<NativeEndian>(self.probe_count_per_cell_axis)?;
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(DatasetMetadata {
            cell_min: read_ivec3(reader)?,
            probe_spacing: reader.read_i32::<NativeEndian>()?,
            cell_max: read_ivec3(reader)?,
            cell_size: reader.read_i32::<NativeEndian>()?,
            probe_count_per_volume_axis: read_ivec3(reader)?,
            probe_count_per_cell_axis: reader.read_i32::<NativeEndian>()?,
        })
    }

    /// Decodes a metadata file's contents, rejecting records of the wrong
    /// size or with impossible values.
    pub fn decode(bytes: &[u8]) -> Result<Self, DatasetError> {
        if bytes.len() != Self::ENCODED_SIZE {
            return Err(DatasetError::MetadataSize {
                expected: Self::ENCODED_SIZE,
                actual: bytes.len(),
            });
        }

        let mut reader = bytes;
        let metadata = DatasetMetadata::read(&mut reader).map_err(|_| {
            DatasetError::MetadataSize {
                expected: Self::ENCODED_SIZE,
                actual: bytes.len(),
            }
        })?;

        if metadata.probe_spacing <= 0 || metadata.cell_size <= 0 {
            return Err(DatasetError::InvalidMetadata("non-positive spacing or cell size"));
        }
        if metadata.cell_size % metadata.probe_spacing != 0 {
            return Err(DatasetError::InvalidMetadata(
                "cell size isn't a multiple of the probe spacing",
            ));
        }
        if metadata.cell_max.cmplt(metadata.cell_min).any()
            || metadata.probe_count_per_volume_axis.cmplt(IVec3::ONE).any()
        {
            return Err(DatasetError::InvalidMetadata("empty bounds"));
        }
        Ok(metadata)
    }
}

impl CellRecord {
    pub const ENCODED_SIZE: usize = 8 * 4;

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_vec4(writer, self.position)?;
        write_vec4(writer, self.cell_index)
    }

    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(CellRecord {
            position: read_vec4(reader)?,
            cell_index: read_vec4(reader)?,
        })
    }
}

fn write_ivec3<W: Write>(writer: &mut W, v: IVec3) -> io::Result<()> {
    writer.write_i32::<NativeEndian>(v.x)?;
    writer.write_i32::<NativeEndian>(v.y)?;
    writer.write_i32::<NativeEndian>(v.z)
}

fn read_ivec3<R: Read>(reader: &mut R) -> io::Result<IVec3> {
    Ok(IVec3::new(
        reader.read_i32::<NativeEndian>()?,
        reader.read_i32::<NativeEndian>()?,
        reader.read_i32::<NativeEndian>()?,
    ))
}

fn write_vec4<W: Write>(writer: &mut W, v: Vec4) -> io::Result<()> {
    for value in v.to_array() {
        writer.write_f32::<NativeEndian>(value)?;
    }
    Ok(())
}

fn read_vec4<R: Read>(reader: &mut R) -> io::Result<Vec4> {
    let mut values = [0.0; 4];
    reader.read_f32_into::<NativeEndian>(&mut values)?;
    Ok(Vec4::from_array(values))
}

fn write_group<W: Write>(writer: &mut W, group: &[f16; 4]) -> io::Result<()> {
    for value in group {
        writer.write_u16::<NativeEndian>(value.to_bits())?;
    }
    Ok(())
}

fn read_group<R: Read>(reader: &mut R) -> io::Result<[f16; 4]> {
    let mut bits = [0; 4];
    reader.read_u16_into::<NativeEndian>(&mut bits)?;
    Ok(bits.map(f16::from_bits))
}

impl DatasetWriter {
    pub fn new(dir: impl Into<PathBuf>) -> DatasetWriter {
        DatasetWriter { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes the four dataset files. The directory must exist.
    ///
    /// Nothing is written if the grid fails validation. A failure partway
    /// through leaves the files that were already written in place.
    pub fn write(
        &self,
        grid: &ProbeGrid,
        settings: &GridSettings,
    ) -> Result<DatasetMetadata, DatasetError> {
        let metadata = DatasetMetadata::from_grid(grid, settings)?;

        let mut probe_order: Vec<usize> = (0..grid.probes.len()).collect();
        probe_order.sort_by_key(|&index| scan_order_key(grid.probes[index].position));
        let packed: Vec<[[f16; 4]; 7]> = probe_order
            .iter()
            .map(|&index| pack_probe(&grid.probes[index].coefficients))
            .collect();

        self.write_file(METADATA_FILE_NAME, |writer| metadata.write(writer))?;
        self.write_file(L0L1_FILE_NAME, |writer| {
            write_components(writer, &packed, &ShComponent::L0L1)
        })?;
        self.write_file(L2_FILE_NAME, |writer| {
            write_components(writer, &packed, &ShComponent::ALL[3..])
        })?;
        self.write_file(CELL_FILE_NAME, |writer| {
            write_cells(writer, grid, &metadata)
        })?;

        info!(
            "Wrote {} probes in {} cells to {}",
            packed.len(),
            grid.cells.len(),
            self.dir.display()
        );
        Ok(metadata)
    }

    fn write_file<F>(&self, name: &str, body: F) -> Result<(), DatasetError>
    where
        F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
    {
        let path = self.dir.join(name);
        let file = File::create(&path).map_err(io_error(&path))?;
        let mut writer = BufWriter::new(file);
        body(&mut writer).map_err(io_error(&path))?;
        writer.flush().map_err(io_error(&path))
    }
}

fn write_components<W: Write>(
    writer: &mut W,
    packed: &[[[f16; 4]; 7]],
    components: &[ShComponent],
) -> io::Result<()> {
    for component in components {
        for groups in packed {
            write_group(writer, &groups[component.slot()])?;
        }
    }
    Ok(())
}

fn write_cells<W: Write>(
    writer: &mut W,
    grid: &ProbeGrid,
    metadata: &DatasetMetadata,
) -> io::Result<()> {
    let cell_counts = metadata.cell_count_per_axis();
    let probe_count_per_slice = metadata.probe_count_per_slice() as f32;

    let mut cells: Vec<_> = grid.cells.iter().collect();
    cells.sort_by_key(|cell| scan_order_key(cell.position));

    for cell in cells {
        let local = (cell.min() - metadata.cell_min) / metadata.cell_size;
        let flattened = local.x + local.y * cell_counts.x + local.z * cell_counts.x * cell_counts.y;
        CellRecord {
            position: cell.position.as_vec3().extend(probe_count_per_slice),
            cell_index: local.as_vec3().extend(flattened as f32),
        }
        .write(writer)?;
    }
    Ok(())
}

impl DatasetReader {
    /// Opens a dataset directory and reads its metadata.
    pub fn open(dir: impl Into<PathBuf>) -> Result<DatasetReader, DatasetError> {
        let dir = dir.into();
        let metadata = read_metadata(&dir)?;
        Ok(DatasetReader { dir, metadata })
    }

    pub fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    pub fn cell_records(&self) -> Result<Vec<CellRecord>, DatasetError> {
        let path = self.dir.join(CELL_FILE_NAME);
        let bytes = std::fs::read(&path).map_err(io_error(&path))?;
        let mut reader = &bytes[..];
        let mut records = Vec::with_capacity(bytes.len() / CellRecord::ENCODED_SIZE);
        while reader.len() >= CellRecord::ENCODED_SIZE {
            records.push(CellRecord::read(&mut reader).map_err(io_error(&path))?);
        }
        Ok(records)
    }

    /// Reads and unpacks the coefficients of the probe at `index` in scan
    /// order.
    pub fn probe_coefficients(
        &self,
        index: usize,
    ) -> Result<[f32; SH_COEFFICIENT_COUNT], DatasetError> {
        let count = self.metadata.total_probe_count();
        if index >= count {
            return Err(DatasetError::ProbeOutOfRange { index, count });
        }

        let mut groups = [[f16::ZERO; 4]; 7];
        for (slot, component) in ShComponent::ALL.iter().enumerate() {
            let path = self.dir.join(component.file_name());
            let mut file = File::open(&path).map_err(io_error(&path))?;
            let offset = self.metadata.component_file_offset(*component)
                + (index * BYTES_PER_GROUP) as u64;
            file.seek(SeekFrom::Start(offset)).map_err(io_error(&path))?;
            groups[slot] = read_group(&mut file).map_err(io_error(&path))?;
        }
        Ok(unpack_probe(&groups))
    }

    /// The scan-order index of the probe at a world position, if it's part
    /// of the dataset.
    pub fn probe_index(&self, position: IVec3) -> Option<usize> {
        let metadata = &self.metadata;
        let offset = position - metadata.cell_min;
        if offset.cmplt(IVec3::ZERO).any() || offset % metadata.probe_spacing != IVec3::ZERO {
            return None;
        }
        let coord = offset / metadata.probe_spacing;
        if coord.cmpge(metadata.probe_count_per_volume_axis).any() {
            return None;
        }
        let counts = metadata.probe_count_per_volume_axis;
        Some((coord.x + coord.y * counts.x + coord.z * counts.x * counts.y) as usize)
    }
}

/// Reads and validates the metadata file of a dataset directory.
pub fn read_metadata(dir: &Path) -> Result<DatasetMetadata, DatasetError> {
    let path = dir.join(METADATA_FILE_NAME);
    let bytes = std::fs::read(&path).map_err(io_error(&path))?;
    DatasetMetadata::decode(&bytes)
}
