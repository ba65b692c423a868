use copperpath::*;

fn parse(input: &str) -> GerberLayer {
    GerberParser::new()
        .parse_str(input)
        .expect("layer should parse")
}

fn diameter(layer: &GerberLayer, primitive: &Primitive) -> i32 {
    match layer.aperture_of(primitive) {
        Some(Aperture::Circular { diameter }) => *diameter,
        other => panic!("expected a circular aperture, got {other:?}"),
    }
}

fn rectangle(layer: &GerberLayer, primitive: &Primitive) -> (i32, i32) {
    match layer.aperture_of(primitive) {
        Some(Aperture::Rectangular { width, height }) => (*width, *height),
        other => panic!("expected a rectangular aperture, got {other:?}"),
    }
}

fn line(primitive: &Primitive) -> (Point, Point) {
    match primitive {
        Primitive::Linear { from, to, .. } => (*from, *to),
        other => panic!("expected a linear stroke, got {other:?}"),
    }
}

fn flash(primitive: &Primitive) -> Point {
    match primitive {
        Primitive::Flash { point, .. } => *point,
        other => panic!("expected a flash, got {other:?}"),
    }
}

fn region(primitive: &Primitive) -> &[Curve] {
    match primitive {
        Primitive::Region { segments, .. } => segments,
        other => panic!("expected a region, got {other:?}"),
    }
}

fn p(x: i32, y: i32) -> Point {
    Point::new(x, y)
}

#[test]
fn test_eagle_layer() {
    let layer = parse(
        "G75*\nG70*\n%OFA0B0*%\n%FSLAX24Y24*%\n%IPPOS*%\n%LPD*%\n\
         %AMOC8*\n5,1,8,0,0,1.08239X$1,22.5*\n%\n\
         %ADD10C,0.0000*%\n%ADD11R,0.0591X0.0197*%\n%ADD16C,0.0740*%\n%ADD22C,0.0236*%\n\
         D10*\nX000100Y000100D02*\nX000100Y012305D01*\nX012108Y012305D01*\n\
         D11*\nX006181Y005549D03*\nX006181Y006179D03*\n\
         D16*\nX003624Y010901D03*\nX002624Y010901D03*\n\
         D22*\nX004594Y008561D02*\nX003214Y008561D01*\nX002874Y008901D01*\nM02*",
    );
    let prims = &layer.primitives;
    assert_eq!(prims.len(), 8, "Eagle sample should yield 8 primitives");

    assert_eq!(diameter(&layer, &prims[0]), 0);
    assert_eq!(line(&prims[0]), (p(254, 254), p(254, 31254)));
    assert_eq!(line(&prims[1]), (p(254, 31254), p(30754, 31254)));

    assert_eq!(rectangle(&layer, &prims[2]), (1501, 500));
    assert_eq!(flash(&prims[2]), p(15699, 14094));
    assert_eq!(flash(&prims[3]), p(15699, 15694));

    assert_eq!(diameter(&layer, &prims[4]), 1879);
    assert_eq!(flash(&prims[4]), p(9204, 27688));
    assert_eq!(flash(&prims[5]), p(6664, 27688));

    assert_eq!(diameter(&layer, &prims[6]), 599);
    assert_eq!(line(&prims[6]), (p(11668, 21744), p(8163, 21744)));
    assert_eq!(line(&prims[7]), (p(8163, 21744), p(7299, 22608)));
}

#[test]
fn test_orcad_layer() {
    let layer = parse(
        "*\nG04 Mass Parameters ***\n*\nG04 Image ***\n*\n\
         %IND:\\FILENAME*%\n%ICAS*%\n%MOIN*%\n%IPPOS*%\n%ASAXBY*%\n\
         G74*%FSLAN2X34Y34*%\n*\nG04 Aperture Definitions ***\n*\n\
         %ADD10R,0.0500X0.0600*%\n%ADD16C,0.0600*%\n%ADD25C,0.0100*%\n\
         *\nG04 Plot Data ***\n*\n\
         G54D25*\nG01X0005590Y0015160D02*\nY0014340D01*\nX0006410D02*\nX0005590D01*\n\
         G54D10*\nX0019600Y0023250D03*\nX0018400D03*\n\
         G54D16*\nX0034750Y0023250D03*\nY0018250D03*\n%LPD*%\nM02*\n",
    );
    let prims = &layer.primitives;
    assert_eq!(prims.len(), 6, "OrCAD sample should yield 6 primitives");
    assert!(
        !layer.diagnostics.is_empty(),
        "Unknown parameters should be reported, not fatal"
    );

    assert_eq!(diameter(&layer, &prims[0]), 254);
    assert_eq!(line(&prims[0]), (p(14198, 38506), p(14198, 36423)));
    assert_eq!(line(&prims[1]), (p(16281, 36423), p(14198, 36423)));

    assert_eq!(rectangle(&layer, &prims[2]), (1270, 1524));
    assert_eq!(flash(&prims[2]), p(49784, 59055));
    assert_eq!(flash(&prims[3]), p(46736, 59055));

    assert_eq!(diameter(&layer, &prims[4]), 1524);
    assert_eq!(flash(&prims[4]), p(88265, 59055));
    assert_eq!(flash(&prims[5]), p(88265, 46355));
}

#[test]
fn test_kicad_layer() {
    let layer = parse(
        "G04 (created by PCBNEW (2013-07-07 BZR 4022)-stable) date 23/01/2014 11:32:09*\n\
         %MOIN*%\nG04 Gerber Fmt 3.4, Leading zero omitted, Abs format*\n%FSLAX34Y34*%\n\
         G01*\nG70*\nG90*\nG04 APERTURE LIST*\n\
         %ADD12C,0.055*%\n%ADD13R,0.144X0.08*%\n%ADD39C,0.012*%\nG04 APERTURE END LIST*\n\
         G54D12*\nX29724Y-52649D03*\nG54D13*\nX34842Y-57796D03*\n\
         G54D39*\nX30905Y-49428D02*\nX30905Y-49094D01*\nX31023Y-47755D02*\nX30433Y-47755D01*\nM02*",
    );
    let prims = &layer.primitives;
    assert_eq!(prims.len(), 4, "KiCad sample should yield 4 primitives");

    assert_eq!(diameter(&layer, &prims[0]), 1397);
    assert_eq!(flash(&prims[0]), p(75498, -133728));
    assert_eq!(rectangle(&layer, &prims[1]), (3657, 2032));
    assert_eq!(flash(&prims[1]), p(88498, -146801));

    assert_eq!(diameter(&layer, &prims[2]), 304);
    assert_eq!(line(&prims[2]), (p(78498, -125547), p(78498, -124698)));
    assert_eq!(line(&prims[3]), (p(78798, -121297), p(77299, -121297)));
}

#[test]
fn test_sprint_layout_layer() {
    let layer = parse(
        "%FSLAX32Y32*%\n%MOMM*%\n%LNKUPFERSEITE2*%\nG71*\nG01*\n\
         %ADD10C, 0.25*%\n%ADD11C, 1.80*%\n%ADD12C, 2.00*%\n%LPD*%\n\
         G36*\nX654Y852D02*\nX654Y822D01*\nX534Y822D01*\nX534Y852D01*\nX654Y852D01*\nG37*\n\
         G54D10*\nX1474Y1163D02*\nX1474Y1263D01*\n\
         G54D11*\nD03*\nX1103Y438D02*\nG54D12*\nD03*\nX2126Y1233D02*\nM02*\n",
    );
    let prims = &layer.primitives;
    assert_eq!(prims.len(), 4, "Sprint sample should yield 4 primitives");

    let segments = region(&prims[0]);
    assert_eq!(segments.len(), 4, "Region should keep its four edges");
    assert_eq!(
        (segments[0].from(), segments[0].to()),
        (p(6540, 8520), p(6540, 8220))
    );
    assert_eq!(
        (segments[3].from(), segments[3].to()),
        (p(5340, 8520), p(6540, 8520))
    );
    let bounds = prims[0].geometry_bounds();
    assert_eq!(bounds.min, p(5340, 8220));
    assert_eq!(bounds.max, p(6540, 8520));

    assert_eq!(diameter(&layer, &prims[1]), 250);
    assert_eq!(line(&prims[1]), (p(14740, 11630), p(14740, 12630)));

    assert_eq!(diameter(&layer, &prims[2]), 1800);
    assert_eq!(flash(&prims[2]), p(14740, 12630), "Bare D03 flashes in place");
    assert_eq!(diameter(&layer, &prims[3]), 2000);
    assert_eq!(flash(&prims[3]), p(11030, 4380));
}

#[test]
fn test_designspark_layer() {
    let layer = parse(
        "%FSLAX23Y23*%\n%MOMM*%\nG04 EasyPC Gerber Version 16.0.6 Build 3249 *\n\
         %ADD23R,1.52400X1.52400*%\n%ADD13R,1.87960X1.87960*%\n%ADD14C,1.87960*%\n\
         X0Y0D02*\nD02*\nD13*\nX17844Y25718D03*\nD02*\nD14*\nX20384D02*\nX22924D01*\n\
         D02*\nD23*\nX17844Y7049D03*\nY25464D03*\nX0Y0D02*\nM02*",
    );
    let prims = &layer.primitives;
    assert_eq!(prims.len(), 4, "DesignSpark sample should yield 4 primitives");

    assert_eq!(rectangle(&layer, &prims[0]), (1879, 1879));
    assert_eq!(flash(&prims[0]), p(17844, 25718));
    assert_eq!(diameter(&layer, &prims[1]), 1879);
    assert_eq!(line(&prims[1]), (p(20384, 25718), p(22924, 25718)));
    assert_eq!(rectangle(&layer, &prims[2]), (1524, 1524));
    assert_eq!(flash(&prims[2]), p(17844, 7049));
    assert_eq!(flash(&prims[3]), p(17844, 25464), "Missing X keeps the last X");
}

#[test]
fn test_proteus_signed_coordinates() {
    let layer = parse(
        "G04 PROTEUS RS274X GERBER FILE*\n%FSLAX24Y24*%\n%MOIN*%\n%ADD11C,0.0080*%\n\
         G54D11*\nX+3077Y-16191D02*\nX+8457Y-16191D01*\nX-44265Y+11501D01*\nM00*\n",
    );
    let prims = &layer.primitives;
    assert_eq!(prims.len(), 2, "Proteus sample should yield 2 primitives");

    assert_eq!(diameter(&layer, &prims[0]), 203);
    assert_eq!(line(&prims[0]), (p(7815, -41125), p(21480, -41125)));
    assert_eq!(line(&prims[1]), (p(21480, -41125), p(-112433, 29212)));
}

#[test]
fn test_easypc_arcs_and_regions() {
    let layer = parse(
        "%FSLAX23Y23*%\n%MOIN*%\nG04 EasyPC Gerber Version 17.0 Build 3379 *\n\
         %ADD102R,0.06000X0.06000*%\n%ADD27C,0.00800*%\n%ADD17R,0.07800X0.02200*%\n\
         %ADD114R,0.12598X0.03937*%\n%ADD115R,0.06890X0.05906*%\n%ADD103R,0.07090X0.06300*%\n\
         %ADD113C,0.01654*%\n%ADD112C,0.05906*%\n%ADD116C,0.06299*%\n\
         D113*\nX203Y186D02*\nG75*\nG02X224Y224I81J-22D01*\nG01*\nX181*\n\
         G75*\nG02X203Y186I-59J-59*\nG01*\n\
         G36*\nG75*\nG02X224Y224I81J-22*\nG01*\nX181*\nG75*\nG02X203Y186I-59J-59*\nG01*\nG37*\n\
         Y654D02*\nX254Y602D01*\nM02*\n",
    );
    let prims = &layer.primitives;
    assert_eq!(prims.len(), 5, "EasyPC sample should yield 5 primitives");

    match &prims[0] {
        Primitive::Circular { arc, .. } => {
            assert_eq!(arc.from, p(5156, 4724));
            assert_eq!(arc.to, p(5689, 5689));
            assert_eq!(arc.center, p(7213, 4166));
            assert!(arc.clockwise, "G02 should produce a clockwise arc");
        }
        other => panic!("expected an arc, got {other:?}"),
    }
    assert_eq!(diameter(&layer, &prims[0]), 420);
    assert_eq!(line(&prims[1]), (p(5689, 5689), p(4597, 5689)));
    match &prims[2] {
        Primitive::Circular { arc, .. } => {
            assert_eq!(arc.from, p(4597, 5689));
            assert_eq!(arc.to, p(5156, 4724));
            assert_eq!(arc.center, p(3099, 4191));
        }
        other => panic!("expected an arc, got {other:?}"),
    }
    assert_eq!(region(&prims[3]).len(), 3, "Region mixes arcs and lines");
    assert_eq!(line(&prims[4]), (p(5156, 16611), p(6451, 15290)));
}

#[test]
fn test_allegro_region() {
    let layer = parse(
        "%FSLAX55Y55*MOIN*%\n%IR0*IPPOS*OFA0.00000B0.00000*MIA0B0*SFA1.00000B1.00000*%\n\
         %ADD14C,.024*%\n%ADD11C,.06*%\n%ADD10C,.025*%\n%ADD13C,.035*%\n%ADD12C,.065*%\n\
         %ADD15C,.015*%\n%ADD16C,.070004*%\n%ADD17C,.075004*%\nG75*\n%LPD*%\nG75*\nG36*\n\
         G01X90625Y7880D02*\nY94565D01*\nX86684Y98505D01*\nY141847D01*\nX82744D01*\n\
         Y149728D01*\nX90625D01*\nX94565Y153668D01*\nY173369D01*\nX94094Y173840D01*\n\
         X94084Y173905D01*\nG03X91160Y176828I-3459J-536D01*\nG01X91096Y176838D01*\n\
         X90625Y177309D01*\nX82744D01*\nY189130D01*\nX94565D01*\nY193070D01*\nX86684D01*\n\
         Y216711D01*\nX102445D01*\nY203200D01*\nX93306D01*\nG03Y198700I-2681J-2250D01*\n\
         G01X100436D01*\nG02X100719Y198017I0J-400D01*\nG01X100195Y197493D01*\nY139597D01*\n\
         X94565Y133967D01*\nY106385D01*\nX98505Y102445D01*\nY19701D01*\nX102445Y15761D01*\n\
         X122904D01*\nX125094Y13570D01*\nX133350D01*\nX134774Y12147D01*\nX144220D01*\n\
         X147834Y15761D01*\nX232472D01*\nX236412Y19701D01*\nY55163D01*\nX232267Y59308D01*\n\
         X232261Y59382D01*\nG03X228807Y62836I-3739J-285D01*\nG01X228733Y62842D01*\n\
         X224591Y66983D01*\nX212771D01*\nX208831Y63043D01*\nY55163D01*\nX200950Y47282D01*\n\
         X197010D01*\nX193070Y51223D01*\nY59103D01*\nX200950Y66983D01*\nY80557D01*\n\
         G02X201690Y80767I400J0D01*\nG03X206828Y85942I3191J1970D01*\n\
         G02X207036Y86684I208J342D01*\nG01X226367D01*\nG02X226575Y85942I0J-400D01*\n\
         G03X230468I1947J-3205D01*\nG02X230676Y86684I208J342D01*G01X241110D01*\n\
         X255181Y72614D01*\nX296447D01*\nX310518Y86684D01*\nX316987D01*\n\
         G02X317194Y85942I0J-400D01*\nG03X321088I1947J-3205D01*\nG02X321296Y86684I208J342D01*\n\
         G01X334917D01*\nY63043D01*\nX248233D01*\nY7880D01*\nX90625D01*\nG37*\nM02*",
    );
    assert_eq!(layer.primitives.len(), 1, "Allegro sample is a single region");
    assert_eq!(region(&layer.primitives[0]).len(), 75);

    let bounds = layer.primitives[0].geometry_bounds();
    assert_eq!(bounds.min, p(21016, 2001));
    assert_eq!(bounds.max, p(85068, 55044));
}

#[test]
fn test_combined_parameter_block() {
    let layer = parse(
        "%FSLAX25Y25*MOMM*%\n%IR0*IPPOS*OFA0.00000B0.00000*MIA0B0*SFA1.00000B1.00000*%\n\
         %ADD31R,1.25X1.*%\nG54D31*\nX2815250Y1849500D03*\nY2050000D03*\nM02*",
    );
    let prims = &layer.primitives;
    assert_eq!(prims.len(), 2);
    assert_eq!(flash(&prims[0]), p(28152, 18495));
    assert_eq!(flash(&prims[1]), p(28152, 20500));
    assert_eq!(rectangle(&layer, &prims[0]), (1250, 1000));
}

#[test]
fn test_unknown_command_class_is_fatal() {
    let err = GerberParser::new()
        .parse_str("%FSLAX24Y24*%\n%MOMM*%\nT01*\nM02*")
        .unwrap_err();
    assert!(err.is_fatal(), "Statements of an unknown class abort the parse");
}

#[test]
fn test_parse_file_records_modification_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("top.gbr");
    std::fs::write(
        &path,
        "%FSLAX24Y24*%\n%MOMM*%\n%ADD10C,0.2*%\nD10*\nX0Y0D02*\nX10000Y0D01*\nM02*",
    )
    .unwrap();

    let layer = GerberParser::parse_file(&path).unwrap();
    assert_eq!(layer.primitives.len(), 1);
    assert!(
        layer.source_modified.is_some(),
        "Layers read from disk carry their modification time"
    );
}
