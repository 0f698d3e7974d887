//! End-to-end coverage of `process_files` across multiple packages, plus a
//! transposed-file round trip (spec §8 S4).

use std::io::Write;
use std::path::Path;

use tempfile::tempdir;

fn write_file(path: &Path, contents: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut f = std::fs::File::create(path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
}

#[test]
fn two_packages_load_in_dependency_order() {
    let dir = tempdir().unwrap();

    let base_dir = dir.path().join("base");
    write_file(
        &base_dir.join("Manifest.transposed.tsv"),
        "package_id:string\tbase\nname:string\tBase\nversion:string\t1.0.0\ndescription:string\tBase package\n",
    );
    write_file(&base_dir.join("currencies.tsv"), "code:string\tsymbol:string\nUSD\t$\n");

    let shop_dir = dir.path().join("shop");
    write_file(
        &shop_dir.join("Manifest.transposed.tsv"),
        "package_id:string\tshop\nname:string\tShop\nversion:string\t1.0.0\ndescription:string\tShop package\nload_after[1]:string\tbase\n",
    );
    write_file(&shop_dir.join("items.tsv"), "name:string\tprice:float\nsword\t=10\n");

    let result = tabulua::process_files(&[dir.path().to_path_buf()], None).expect("process_files should succeed");

    assert_eq!(result.package_order, vec!["base".to_string(), "shop".to_string()]);
    assert!(result.validation_passed);
    assert_eq!(result.tsv_files.len(), 2);
}

#[test]
fn cyclic_package_dependency_aborts_processing() {
    let dir = tempdir().unwrap();

    write_file(
        &dir.path().join("a/Manifest.transposed.tsv"),
        "package_id:string\ta\nname:string\tA\nversion:string\t1.0.0\ndescription:string\td\nload_after[1]:string\tb\n",
    );
    write_file(
        &dir.path().join("b/Manifest.transposed.tsv"),
        "package_id:string\tb\nname:string\tB\nversion:string\t1.0.0\ndescription:string\td\nload_after[1]:string\ta\n",
    );

    let result = tabulua::process_files(&[dir.path().to_path_buf()], None);
    assert!(result.is_none(), "a package dependency cycle should abort processing");
}

#[test]
fn transposed_dataset_round_trips_through_tostring() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("core/Manifest.transposed.tsv");
    write_file(
        &path,
        "package_id:string\tcore\nname:string\tCore\nversion:string\t2.1.0\ndescription:string\tCore package\n",
    );

    let sink = tabulua::Diagnostics::new();
    let registry = tabulua::TypeRegistry::new();
    let raw = std::fs::read_to_string(&path).unwrap();
    let physical = tabulua::codec::decode(&raw);
    let logical = tabulua::codec::reverse_transpose(&physical);
    let dataset = tabulua::model::build_dataset(&sink, &registry, &path, &logical, true).unwrap();

    let row = dataset.row(2).expect("manifest data row");
    assert_eq!(row.get("package_id").and_then(|v| v.as_str().map(str::to_string)), Some("core".to_string()));

    let regenerated = dataset.to_string_tsv().expect("re-encoding should succeed");
    assert!(regenerated.contains("core"));
    assert!(regenerated.contains("2.1.0"));
}
