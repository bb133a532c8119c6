use cnd_ast::Expr;
use cnd_core::{
    translate, translate_unit, ConcreteAxis, ConcreteShape, ShadowPolicy, ShapeError, SingleBound, StorageOrder,
    TranslateConfig, TranslateError,
};
use cnd_lex::Lexer;
use cnd_parse::parse_int_expr;

const BASIC: &str = include_str!("../../demos/basic.c");
const CREAL: &str = include_str!("../../demos/creal.c");
const OPEN: &str = include_str!("../../demos/open.c");

fn bare() -> TranslateConfig {
    TranslateConfig {
        preamble: false,
        ..TranslateConfig::default()
    }
}

fn parse_expr(text: &str) -> Expr {
    let mut tokens = Lexer::new(text).lex().expect("lex");
    tokens.pop();
    parse_int_expr(&tokens).unwrap_or_else(|| panic!("not integer arithmetic: {text}"))
}

/// The subscript of every `name[...]` in `out`, in order.
fn subscripts<'a>(out: &'a str, name: &str) -> Vec<&'a str> {
    let needle = format!("{name}[");
    let mut found = Vec::new();
    let mut rest = out;
    while let Some(at) = rest.find(&needle) {
        let body = &rest[at + needle.len()..];
        let mut depth = 1;
        let end = body
            .char_indices()
            .find_map(|(i, c)| {
                match c {
                    '[' => depth += 1,
                    ']' => depth -= 1,
                    _ => {}
                }
                (depth == 0).then_some(i)
            })
            .expect("closing bracket");
        found.push(&body[..end]);
        rest = &body[end..];
    }
    found
}

#[test]
fn one_based_two_by_two_row_major() {
    let src = "void f(int n, double *a, double *b, double *c)\n\
               {\n\
               dimension a[1:n, 1:n];\n\
               dimension b[1:n, 1:n];\n\
               dimension c[1:n, 1:n];\n\
               x = a[1, 1] + a[2, 2] + a[1, 2] + a[2, 1];\n\
               }\n";
    let out = translate("t.c", src, &bare()).unwrap();
    let offsets: Vec<i64> = subscripts(&out, "a")
        .into_iter()
        .map(|s| parse_expr(s).eval(&[("n", 2)]).unwrap())
        .collect();
    assert_eq!(offsets, vec![0, 3, 1, 2]);
}

#[test]
fn mpole_counts_and_iterates() {
    let src = "void f(int n, double *m)\n\
               {\n\
               dimension \"fortran\" m[0:n, -n:n];\n\
               long count = nitemsof(m);\n\
               CND_FOR_AXIS(j, m, 1) use(j);\n\
               }\n";
    let out = translate("t.c", src, &bare()).unwrap();

    let count_line = out.lines().find(|l| l.starts_with("long count = ")).unwrap();
    let count = parse_expr(count_line.trim_start_matches("long count = ").trim_end_matches(';'));

    let loop_line = out.lines().find(|l| l.starts_with("for (long j = ")).unwrap();
    assert_eq!(loop_line, "for (long j = -n; j <= n; ++j) use(j);");

    for n in 0..6 {
        assert_eq!(count.eval(&[("n", n)]), Ok((n + 1) * (2 * n + 1)));

        let shape = ConcreteShape::new(StorageOrder::ColumnMajor, vec![(0, n), (-n, n)]).unwrap();
        let values: Vec<i64> = shape.axis_values(1).unwrap().collect();
        assert_eq!(values.len() as i64, 2 * n + 1);
        assert_eq!(values.first(), Some(&-n));
        assert!(values.windows(2).all(|w| w[1] == w[0] + 1));
    }

    let t = translate_unit("t.c", src, &bare()).unwrap();
    assert_eq!(t.shapes[0].order, "column-major");
    assert_eq!(t.shapes[0].axes[1].lower, "-n");
    assert_eq!(t.shapes[0].axes[1].upper.as_deref(), Some("n"));
}

#[test]
fn arity_mismatch_is_reported_at_the_site() {
    for site in ["a[1]", "a[1, 2, 3]", "a(1)"] {
        let src = format!("{{ dimension a[3, 3]; x = {site}; }}");
        let err = translate("t.c", &src, &bare()).unwrap_err();
        let TranslateError::Shape(ShapeError::ArityMismatch { expected, span, .. }) = err else {
            panic!("{site}: unexpected {err:?}");
        };
        assert_eq!(expected, 2);
        assert_eq!(&src[span.offset()..span.offset() + span.len()], site);
    }
}

#[test]
fn inner_declarations_do_not_leak() {
    let src = "void f(double *a)\n{\n  dimension a[4];\n  {\n    dimension a[2, 2];\n    a[1, 1] = 0;\n  }\n  a[3] = 1;\n}\n";
    let out = translate("t.c", src, &bare()).unwrap();
    assert!(out.contains("a[3] = 0;"));
    assert!(out.contains("a[3] = 1;"));

    let leak = "void f(double *a)\n{\n  {\n    dimension a[2, 2];\n  }\n  a[1, 1] = 0;\n}\n";
    assert!(matches!(
        translate("t.c", leak, &bare()),
        Err(TranslateError::Shape(ShapeError::UnknownShape { .. }))
    ));
}

#[test]
fn shadowing_policy_applies() {
    let src = "{ dimension a[3]; { dimension a[3, 3]; } }";
    let forbid = TranslateConfig {
        shadowing: ShadowPolicy::Forbid,
        ..bare()
    };
    assert!(translate("t.c", src, &bare()).is_ok());
    assert!(matches!(
        translate("t.c", src, &forbid),
        Err(TranslateError::Shape(ShapeError::Redeclaration { .. }))
    ));
}

#[test]
fn extent_mode_reads_single_bounds_as_sizes() {
    let config = TranslateConfig {
        single_bound: SingleBound::Extent,
        ..bare()
    };
    let out = translate("t.c", "{ dimension a[n, m]; a[i, j] = 0; }", &config).unwrap();
    assert_eq!(out, "{  a[i * m + j] = 0; }");
}

#[test]
fn helper_errors_carry_codes() {
    use miette::Diagnostic;

    for (src, code) in [
        ("{ dimension a[3]; x = lboundof(a, 1); }", "cnd::axis_out_of_range"),
        ("{ dimension a[3]; x = lboundof(a, k); }", "cnd::non_constant_axis"),
        ("{ dimension a[3]; x = lboundof(a); }", "cnd::helper_arity"),
        ("{ dimension a[3]; x = nitemsof(a + 1); }", "cnd::not_a_symbol"),
        ("{ x = nitemsof(q); }", "cnd::unknown_shape"),
        ("{ dimension a[0:]; x = a[1]; }", "cnd::incomplete_shape"),
        ("{ dimension a[0:]; x = nitemsof(a); }", "cnd::incomplete_shape"),
    ] {
        let err = translate("t.c", src, &bare()).unwrap_err();
        let got = err.code().map(|c| c.to_string());
        assert_eq!(got.as_deref(), Some(code), "{src}");
    }
}

#[test]
fn bounds_checks_wrap_each_index() {
    let config = TranslateConfig {
        bounds_check: true,
        ..bare()
    };
    let out = translate("m.c", "{ dimension a[1:n, 1:n];\n a[i, j] = 0; }", &config).unwrap();
    assert!(out.contains(
        "a[(cnd_check_index(i, 1, n, 0, \"a\", \"m.c\", 2) - 1) * n + cnd_check_index(j, 1, n, 1, \"a\", \"m.c\", 2) - 1]"
    ));
}

#[test]
fn basic_demo_translates() {
    let out = translate("basic.c", BASIC, &bare()).unwrap();
    assert_eq!(out.lines().count(), BASIC.lines().count());
    assert!(!out.contains("dimension"));
    assert!(out.contains("tmp += a[(k - 1) * n + i - 1]*b[(j - 1) * n + k - 1];"));
    assert!(out.contains("c[(i - 1) * n + j - 1] = tmp;"));
    assert!(out.contains("for (long j = -n; j <= n; ++j)"));
    assert!(out.contains("complex double *mpole = malloc((n + 1) * (n + n + 1) * sizeof(complex double));"));
    assert!(out.contains("for (long i = 0; i < (n + 1); ++i)"));
    assert!(out.contains("mpole[(j + n) * (n + 1) + i] = i + j*I;"));
    assert!(out.contains("#ifdef CND_DEMO_EXTRA\nint extra;\n#endif"));
}

#[test]
fn creal_demo_uses_a_stack_array() {
    let out = translate("creal.c", CREAL, &bare()).unwrap();
    assert!(out.contains("complex double a[36];"));
    assert!(out.contains("a[5] = 10 + 5*I;"));
    assert!(out.contains("creal(a[5]), cimag(a[5])"));
}

#[test]
fn open_demo_resolves_through_allocation() {
    let out = translate("open.c", OPEN, &bare()).unwrap();
    assert_eq!(out.lines().count(), OPEN.lines().count());
    assert!(out.contains("double *w = malloc(4 * rows * sizeof(double));"));
    assert!(out.contains("for (long j = 0; j <= rows - 1; ++j)"));
    assert!(out.contains("w[(i - 1) * rows + j] = i * 10 + j;"));
    assert!(out.contains("\", 2, (long) (4 * rows),\n"));
    assert!(!out.contains("uboundof"));
}

#[test]
fn comments_inside_indices_do_not_swallow_the_rewrite() {
    let src = "{\n dimension a[3, 3];\n x = a[i, f(j) // column\n ] + 1;\n}\n";
    let out = translate("t.c", src, &bare()).unwrap();
    assert_eq!(out, "{\n \n x = a[i * 4 + f(j)]\n + 1;\n}\n");
    assert_eq!(out.lines().count(), src.lines().count());
}

#[test]
fn c_declarations_of_shaped_names_are_left_alone() {
    let out = translate(
        "t.c",
        "{\n dimension v[1:n];\n double v[n];\n v[n] = 1;\n x = n * v[1];\n return v[2];\n}\n",
        &bare(),
    )
    .unwrap();
    assert_eq!(
        out,
        "{\n \n double v[n];\n v[n - 1] = 1;\n x = n * v[0];\n return v[1];\n}\n"
    );

    let out = translate("t.c", "{ dimension a[1:n, 1:n]; double a[nitemsof(a)]; }", &bare()).unwrap();
    assert_eq!(out, "{  double a[(n * n)]; }");
}

#[test]
fn paren_subscripts_take_semicolons_like_brackets() {
    let out = translate("t.c", "{ dimension a(3, 3); x = a(1; 2); }", &bare()).unwrap();
    assert_eq!(out, "{  x = a[6]; }");
}

#[test]
fn allocation_extents_end_with_their_block() {
    let src = "{\n dimension w[0:];\n {\n  long k = 3;\n  CND_ALLOC_HEAP(double, w, k);\n  w[1] = 0;\n }\n w[1] = 0;\n}\n";
    let err = translate("t.c", src, &bare()).unwrap_err();
    let TranslateError::Shape(ShapeError::IncompleteShape { .. }) = &err else {
        panic!("unexpected {err:?}");
    };

    let same_block = "{\n dimension w[0:];\n long k = 3;\n CND_ALLOC_HEAP(double, w, k);\n {\n  w[1] = 0;\n }\n w[2] = 0;\n}\n";
    let out = translate("t.c", same_block, &bare()).unwrap();
    assert!(out.contains("w[1] = 0;") && out.contains("w[2] = 0;"), "{out}");
}

#[test]
fn views_with_steps_and_leading_dims() {
    let src = "{ dimension \"fortran\" a[1:m:1:lda, 1:n]; x = a[i, j]; l = ldimof(a, 0); s = strideof(a, 1); c = nitemsof(a); }";
    let out = translate("t.c", src, &bare()).unwrap();
    assert_eq!(
        out,
        "{  x = a[(j - 1) * lda + i - 1]; l = lda; s = lda; c = (lda * n); }"
    );

    let src = "{ dimension b[0:3:2, 0:4]; y = b[i, j]; z = strideof(b, 0); w = nitemsof(b); e = extentof(b, 0); }";
    let out = translate("t.c", src, &bare()).unwrap();
    assert!(out.contains("z = 10; w = 40; e = 4;"), "{out}");
    let offset = parse_expr(subscripts(&out, "b")[0]);
    let shape = ConcreteShape::from_axes(
        StorageOrder::RowMajor,
        vec![
            ConcreteAxis { lo: 0, hi: 3, step: 2, leading: None },
            ConcreteAxis::new(0, 4),
        ],
    )
    .unwrap();
    for i in 0..=3 {
        for j in 0..=4 {
            let want = shape.offset(&[i, j]).unwrap() as i64;
            assert_eq!(offset.eval(&[("i", i), ("j", j)]), Ok(want), "b[{i}, {j}]");
        }
    }
}
